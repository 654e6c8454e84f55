//! Pass 3: adapter insertion. Handles the case where edge endpoints differ
//! and a registered adapter bridges them.
//!
//! An adapter is just a block with exactly one input and one output whose
//! declared types differ. This pass never invents conversions: it only
//! splices in a registry-declared adapter whose input/output `(payload,
//! unit)` pair bridges the gap, up to `CompileOptions::max_adapter_chain`
//! hops, and diagnoses `NoConversionPath` otherwise.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::PortId;
use crate::patch::block::{resolve_input, resolve_output};
use crate::patch::graph::Patch;
use crate::registry::{BlockDef, BlockRegistry};
use crate::types::{Payload, Unit};

use super::CompileOptions;

/// Inserts adapter chains on every edge whose endpoints disagree on payload
/// or unit (extent mismatches are the cardinality solver's concern, pass 4,
/// since broadcasting is not a type conversion).
pub fn insert_adapters(patch: &mut Patch, registry: &BlockRegistry, options: CompileOptions, diagnostics: &mut DiagnosticSink) {
    let edges: Vec<(PortId, PortId)> = patch.iter_edges().map(|(_, e)| (e.from, e.to)).collect();

    for (from, to) in edges {
        let Some(from_block) = patch.block(from.block) else { continue };
        let Some(to_block) = patch.block(to.block) else { continue };
        let (Some(out), Some(inp)) = (resolve_output(from_block, from), resolve_input(to_block, to)) else {
            continue;
        };

        let (Payload::Concrete(src_payload), Payload::Concrete(dst_payload)) = (out.ty.payload, inp.ty.payload) else {
            continue; // still variable; let payload resolution finish first.
        };
        let src_unit = out.ty.unit;
        let dst_unit = inp.ty.unit;

        if src_payload == dst_payload && src_unit == dst_unit {
            continue;
        }

        let mut current = from;
        let mut current_payload = src_payload;
        let mut current_unit = src_unit;
        let mut hops = 0u32;
        let mut bridged = false;

        while hops < options.max_adapter_chain {
            if current_payload == dst_payload && current_unit == dst_unit {
                bridged = true;
                break;
            }
            let Some(adapter) = find_adapter(registry, current_payload, current_unit) else {
                break;
            };
            let adapter_block = (adapter.instantiate)();
            let adapter_id = patch.insert_block(adapter_block);
            let adapter_in = PortId {
                block: adapter_id,
                index: 0,
                is_input: true,
            };
            let adapter_out = PortId {
                block: adapter_id,
                index: 0,
                is_input: false,
            };
            patch.insert_edge(current, adapter_in);
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::AdapterInserted,
                Severity::Info,
                TargetRef::Block(adapter_id),
                format!("inserted adapter '{}' on edge toward {:?}", adapter.type_tag, to),
            ));
            let Payload::Concrete(next_payload) = adapter.outputs[0].ty.payload else {
                break;
            };
            current_payload = next_payload;
            current_unit = adapter.outputs[0].ty.unit;
            current = adapter_out;
            hops += 1;
        }

        if current_payload == dst_payload && current_unit == dst_unit {
            bridged = true;
        }

        if bridged {
            if current != from {
                patch.retarget_edge_source(from, to, current);
            }
        } else {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::NoConversionPath,
                Severity::Error,
                TargetRef::Port(to),
                format!("no adapter chain bridges ({src_payload:?}, {src_unit:?}) to ({dst_payload:?}, {dst_unit:?}) within {} hops", options.max_adapter_chain),
            ));
        }
    }
}

fn find_adapter(registry: &BlockRegistry, from_payload: crate::types::PayloadKind, from_unit: Unit) -> Option<&'static BlockDef> {
    registry.iter_sorted().find(|def| {
        def.inputs.len() == 1
            && def.outputs.len() == 1
            && matches!(def.inputs[0].ty.payload, Payload::Concrete(p) if p == from_payload)
            && def.inputs[0].ty.unit == from_unit
            && (def.outputs[0].ty.payload != Payload::Concrete(from_payload) || def.outputs[0].ty.unit != from_unit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileOptions;
    use crate::patch::block::{Block, InputPort, OutputPort};
    use crate::registry::{LowerFn, PortSpec, TimeTopology};
    use crate::types::{CanonicalType, Extent, PayloadKind};

    fn radians_ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Radians, Extent::One)
    }
    fn turns_ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Turns, Extent::One)
    }

    fn noop_lower(_ctx: &mut crate::compiler::lowering::LowerCtx<'_>, _b: &Block, _id: crate::ident::BlockId) -> Result<(), crate::registry::LowerError> {
        Ok(())
    }

    fn instantiate_radians_to_turns() -> Block {
        let mut b = Block::new("RadiansToTurns");
        b.inputs.push(InputPort::new("in", radians_ty()));
        b.outputs.push(OutputPort::new_named("out".into(), turns_ty()));
        b
    }

    static RADIANS_TO_TURNS: BlockDef = BlockDef {
        type_tag: "RadiansToTurns",
        inputs: &[PortSpec::plain("in", CanonicalType::concrete(PayloadKind::Float, Unit::Radians, Extent::One))],
        outputs: &[PortSpec::plain("out", CanonicalType::concrete(PayloadKind::Float, Unit::Turns, Extent::One))],
        time_topology: TimeTopology::Stateless,
        instantiate: instantiate_radians_to_turns,
        lower: noop_lower as LowerFn,
    };

    #[test]
    fn mismatched_units_get_adapter_spliced_in() {
        let mut registry = BlockRegistry::new();
        registry.register(&RADIANS_TO_TURNS);

        let mut patch = Patch::new();
        let mut src = Block::new("Source");
        src.outputs.push(OutputPort::new_named("out".into(), radians_ty()));
        let src_id = patch.insert_block(src);
        let mut sink = Block::new("Sink");
        sink.inputs.push(InputPort::new("in", turns_ty()));
        let sink_id = patch.insert_block(sink);
        let from = PortId { block: src_id, index: 0, is_input: false };
        let to = PortId { block: sink_id, index: 0, is_input: true };
        patch.insert_edge(from, to);

        let mut diagnostics = DiagnosticSink::new();
        insert_adapters(&mut patch, &registry, CompileOptions::default(), &mut diagnostics);

        assert!(!diagnostics.has_blocking());
        assert_eq!(patch.iter_blocks().count(), 3);
    }

    #[test]
    fn no_adapter_available_is_diagnosed() {
        let registry = BlockRegistry::new();
        let mut patch = Patch::new();
        let mut src = Block::new("Source");
        src.outputs.push(OutputPort::new_named("out".into(), radians_ty()));
        let src_id = patch.insert_block(src);
        let mut sink = Block::new("Sink");
        sink.inputs.push(InputPort::new("in", turns_ty()));
        let sink_id = patch.insert_block(sink);
        let from = PortId { block: src_id, index: 0, is_input: false };
        let to = PortId { block: sink_id, index: 0, is_input: true };
        patch.insert_edge(from, to);

        let mut diagnostics = DiagnosticSink::new();
        insert_adapters(&mut patch, &registry, CompileOptions::default(), &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }
}
