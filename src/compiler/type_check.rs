//! Pass 6: type validation. Type equality requires all three components
//! equal. Runs after payload/cardinality/unit solving:
//! everything should be concrete by now, every edge's endpoints should
//! agree exactly, and every multi-writer input's combine mode should be
//! legal for its resolved payload.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::PortId;
use crate::patch::block::{resolve_input, resolve_output};
use crate::patch::graph::Patch;
use crate::registry::BlockRegistry;
use crate::types::Payload;

/// Validates that every port is fully resolved, every edge's endpoints agree
/// exactly, and every multi-writer input declares a combine mode legal for
/// its payload.
pub fn validate_types(patch: &Patch, _registry: &BlockRegistry, diagnostics: &mut DiagnosticSink) {
    for (_, edge) in patch.iter_edges() {
        let (Some(fb), Some(tb)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
            continue;
        };
        let (Some(out), Some(inp)) = (resolve_output(fb, edge.from), resolve_input(tb, edge.to)) else {
            continue;
        };
        if !out.ty.is_fully_resolved() || !inp.ty.is_fully_resolved() {
            continue; // already diagnosed by the owning solver pass.
        }
        if out.ty.payload != inp.ty.payload {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ConflictingPayloads,
                Severity::Error,
                TargetRef::Port(edge.to),
                format!("edge endpoints disagree on payload: {:?} vs {:?}", out.ty.payload, inp.ty.payload),
            ));
        }
        if out.ty.unit != inp.ty.unit {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ConflictingUnits,
                Severity::Error,
                TargetRef::Port(edge.to),
                format!("edge endpoints disagree on unit: {:?} vs {:?}", out.ty.unit, inp.ty.unit),
            ));
        }
        if out.ty.extent != inp.ty.extent {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ConflictingCardinalities,
                Severity::Error,
                TargetRef::Port(edge.to),
                format!("edge endpoints disagree on extent: {:?} vs {:?}", out.ty.extent, inp.ty.extent),
            ));
        }
    }

    for (block_id, block) in patch.iter_blocks() {
        for (index, input) in block.inputs.iter().enumerate() {
            let port = PortId {
                block: block_id,
                index: u16::try_from(index).unwrap_or(u16::MAX),
                is_input: true,
            };
            let writer_count = patch.edges_into(port).len();
            if writer_count <= 1 {
                continue;
            }
            let Payload::Concrete(payload) = input.ty.payload else { continue };
            match input.combine_mode {
                Some(mode) if !mode.allowed_for(payload) => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::InvalidCombineMode,
                        Severity::Error,
                        TargetRef::Port(port),
                        format!("combine mode {mode:?} is not allowed for payload {payload:?}"),
                    ));
                }
                Some(_) => {}
                None => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::InvalidCombineMode,
                        Severity::Error,
                        TargetRef::Port(port),
                        "multiple writers but no combine mode declared".to_owned(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::block::{Block, InputPort, OutputPort};
    use crate::types::{CanonicalType, CombineMode, Extent, PayloadKind, Unit};

    fn ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Color, Unit::Rgba01, Extent::One)
    }

    #[test]
    fn sum_on_color_with_two_writers_is_rejected() {
        let mut patch = Patch::new();
        let mut sink = Block::new("Sink");
        let mut input = InputPort::new("in", ty());
        input.combine_mode = Some(CombineMode::Sum);
        sink.inputs.push(input);
        let sink_id = patch.insert_block(sink);

        for _ in 0..2 {
            let mut src = Block::new("Source");
            src.outputs.push(OutputPort::new_named("out".into(), ty()));
            let src_id = patch.insert_block(src);
            let from = crate::ident::PortId { block: src_id, index: 0, is_input: false };
            let to = crate::ident::PortId { block: sink_id, index: 0, is_input: true };
            patch.insert_edge(from, to);
        }

        let registry = BlockRegistry::new();
        let mut diagnostics = DiagnosticSink::new();
        validate_types(&patch, &registry, &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }
}
