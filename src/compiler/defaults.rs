//! Pass 2: default-source materialization.
//!
//! An unconnected input either gets a registry-declared default block
//! spliced in as its sole source, or — if the registry declares none — is
//! diagnosed as a missing required input. Runs after payload resolution so
//! the default block's output type can be checked against the (by now
//! concrete, where connected) input type.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::PortId;
use crate::patch::graph::Patch;
use crate::registry::BlockRegistry;

/// Splices a default-source block into every unconnected input that
/// declares one, and diagnoses every unconnected input that doesn't.
pub fn materialize_defaults(patch: &mut Patch, registry: &BlockRegistry, diagnostics: &mut DiagnosticSink) {
    let mut to_wire: Vec<(PortId, String)> = Vec::new();
    let mut missing: Vec<PortId> = Vec::new();

    for (block_id, block) in patch.iter_blocks() {
        let Ok(def) = registry.lookup(&block.type_tag) else {
            continue; // unknown types are diagnosed by type validation, pass 6.
        };
        for (index, input) in block.inputs.iter().enumerate() {
            let port = PortId {
                block: block_id,
                index: u16::try_from(index).unwrap_or(u16::MAX),
                is_input: true,
            };
            if !patch.edges_into(port).is_empty() {
                continue;
            }
            let default = input.default_source_override.clone().or_else(|| def.inputs.get(index).and_then(|spec| spec.default_source.map(str::to_owned)));
            match default {
                Some(type_tag) => to_wire.push((port, type_tag)),
                None => missing.push(port),
            }
        }
    }

    for (port, default_type) in to_wire {
        let Ok(def) = registry.lookup(&default_type) else {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::MissingRequiredInput,
                Severity::Error,
                TargetRef::Port(port),
                format!("default source '{default_type}' is not a registered block type"),
            ));
            continue;
        };
        let default_block = (def.instantiate)();
        if default_block.outputs.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::MissingRequiredInput,
                Severity::Error,
                TargetRef::Port(port),
                format!("default source '{default_type}' declares no outputs"),
            ));
            continue;
        }
        let default_id = patch.insert_block(default_block);
        let from = PortId {
            block: default_id,
            index: 0,
            is_input: false,
        };
        patch.insert_edge(from, port);
    }

    for port in missing {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::MissingRequiredInput,
            Severity::Error,
            TargetRef::Port(port),
            "input has no incoming edge and no registry default".to_owned(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::block::{Block, InputPort, OutputPort};
    use crate::registry::{BlockDef, LowerFn, PortSpec, TimeTopology};
    use crate::types::{CanonicalType, Extent, PayloadKind, Unit};

    fn ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One)
    }

    fn noop_lower(_ctx: &mut crate::compiler::lowering::LowerCtx<'_>, _b: &Block, _id: crate::ident::BlockId) -> Result<(), crate::registry::LowerError> {
        Ok(())
    }

    fn instantiate_zero() -> Block {
        let mut b = Block::new("Zero");
        b.outputs.push(OutputPort::new_named("out".into(), ty()));
        b
    }

    static ZERO: BlockDef = BlockDef {
        type_tag: "Zero",
        inputs: &[],
        outputs: &[PortSpec::plain("out", CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One))],
        time_topology: TimeTopology::Stateless,
        instantiate: instantiate_zero,
        lower: noop_lower as LowerFn,
    };

    fn instantiate_consumer() -> Block {
        let mut b = Block::new("Consumer");
        b.inputs.push(InputPort::new("in", ty()));
        b
    }

    static CONSUMER: BlockDef = BlockDef {
        type_tag: "Consumer",
        inputs: &[PortSpec {
            name: "in",
            ty: CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One),
            default_combine_mode: None,
            default_source: Some("Zero"),
            zip_member: false,
        }],
        outputs: &[],
        time_topology: TimeTopology::Stateless,
        instantiate: instantiate_consumer,
        lower: noop_lower as LowerFn,
    };

    #[test]
    fn unconnected_input_gets_default_wired() {
        let mut registry = BlockRegistry::new();
        registry.register(&ZERO);
        registry.register(&CONSUMER);
        let mut patch = Patch::new();
        patch.insert_block(instantiate_consumer());

        let mut diagnostics = DiagnosticSink::new();
        materialize_defaults(&mut patch, &registry, &mut diagnostics);

        assert!(!diagnostics.has_blocking());
        assert_eq!(patch.iter_blocks().count(), 2);
        assert_eq!(patch.iter_edges().count(), 1);
    }

    #[test]
    fn missing_default_is_diagnosed() {
        fn instantiate_no_default() -> Block {
            let mut b = Block::new("NoDefault");
            b.inputs.push(InputPort::new("in", ty()));
            b
        }
        static NO_DEFAULT: BlockDef = BlockDef {
            type_tag: "NoDefault",
            inputs: &[PortSpec::plain("in", CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One))],
            outputs: &[],
            time_topology: TimeTopology::Stateless,
            instantiate: instantiate_no_default,
            lower: noop_lower as LowerFn,
        };
        let mut registry = BlockRegistry::new();
        registry.register(&NO_DEFAULT);
        let mut patch = Patch::new();
        patch.insert_block(instantiate_no_default());

        let mut diagnostics = DiagnosticSink::new();
        materialize_defaults(&mut patch, &registry, &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }
}
