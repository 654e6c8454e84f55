//! Pass 5: unit solving. Same union-find shape as payload
//! resolution (pass 1), over `Unit::Variable` slots instead of payloads.
//!
//! Runs after cardinality so it benefits from concrete extents, and after it
//! resolves every unit variable it splices an adapter onto any edge whose two
//! now-concrete units disagree but are registry-convertible — the mirror of
//! pass 3's adapter insertion, just run a second time now that unification
//! has turned what were two unit variables into two concrete, possibly still
//! mismatched, units. Pass 3 can't catch this case: at that point at least
//! one side was still a `Unit::Variable`, so the two sides could never be
//! compared as concrete values.

use rustc_hash::FxHashMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::PortId;
use crate::patch::block::{resolve_input, resolve_output};
use crate::patch::graph::Patch;
use crate::registry::{BlockDef, BlockRegistry};
use crate::types::Unit;

use super::union_find::UnionFind;
use super::CompileOptions;

/// Resolves every `Unit::Variable` in `patch`'s ports to a concrete `Unit`,
/// then inserts adapters on edges whose resolved units still disagree.
pub fn solve_units(patch: &mut Patch, registry: &BlockRegistry, options: CompileOptions, diagnostics: &mut DiagnosticSink) {
    let Some(max_var) = max_variable_id(patch) else {
        insert_post_resolution_adapters(patch, registry, options, diagnostics);
        return;
    };
    let mut uf = UnionFind::new(max_var as usize + 1);

    for (_, edge) in patch.iter_edges() {
        let (Some(fb), Some(tb)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
            continue;
        };
        let (Some(out), Some(inp)) = (resolve_output(fb, edge.from), resolve_input(tb, edge.to)) else {
            continue;
        };
        if let (Unit::Variable(a), Unit::Variable(b)) = (out.ty.unit, inp.ty.unit) {
            uf.union(a as usize, b as usize);
        }
    }

    let mut resolved: FxHashMap<usize, Unit> = FxHashMap::default();
    let mut conflicted: FxHashMap<usize, ()> = FxHashMap::default();

    let mut changed = true;
    while changed {
        changed = false;
        for (_, edge) in patch.iter_edges() {
            let (Some(fb), Some(tb)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
                continue;
            };
            let (Some(out), Some(inp)) = (resolve_output(fb, edge.from), resolve_input(tb, edge.to)) else {
                continue;
            };
            if !out.ty.unit.is_variable() {
                if let Unit::Variable(v) = inp.ty.unit {
                    changed |= assign(&mut uf, &mut resolved, &mut conflicted, v as usize, out.ty.unit);
                }
            }
            if !inp.ty.unit.is_variable() {
                if let Unit::Variable(v) = out.ty.unit {
                    changed |= assign(&mut uf, &mut resolved, &mut conflicted, v as usize, inp.ty.unit);
                }
            }
        }
    }

    for root in conflicted.keys() {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::ConflictingUnits,
            Severity::Error,
            TargetRef::Patch,
            format!("unit variable class {root} was forced to two different concrete units"),
        ));
    }

    for (_, block) in patch.iter_blocks_mut() {
        for port in block.inputs.iter_mut().map(|p| &mut p.ty).chain(block.outputs.iter_mut().map(|p| &mut p.ty)) {
            if let Unit::Variable(v) = port.unit {
                let root = uf.find(v as usize);
                if conflicted.contains_key(&root) {
                    continue;
                }
                if let Some(&unit) = resolved.get(&root) {
                    port.unit = unit;
                } else {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnresolvedUnit,
                        Severity::Error,
                        TargetRef::Patch,
                        format!("unit variable {v} never resolved to a concrete unit"),
                    ));
                }
            }
        }
    }

    insert_post_resolution_adapters(patch, registry, options, diagnostics);
}

/// Splices an adapter onto any edge whose endpoints are both concrete (every
/// unit variable above has already resolved) but still disagree on unit.
/// Mirrors pass 3's chaining: walk the registry's adapter graph up to
/// `max_adapter_chain` hops, retargeting the edge onto the far end of the
/// chain, diagnosing `NoConversionPath` if no chain bridges the gap.
fn insert_post_resolution_adapters(patch: &mut Patch, registry: &BlockRegistry, options: CompileOptions, diagnostics: &mut DiagnosticSink) {
    let edges: Vec<(PortId, PortId)> = patch.iter_edges().map(|(_, e)| (e.from, e.to)).collect();

    for (from, to) in edges {
        let Some(from_block) = patch.block(from.block) else { continue };
        let Some(to_block) = patch.block(to.block) else { continue };
        let (Some(out), Some(inp)) = (resolve_output(from_block, from), resolve_input(to_block, to)) else {
            continue;
        };

        let src_unit = out.ty.unit;
        let dst_unit = inp.ty.unit;
        if src_unit.is_variable() || dst_unit.is_variable() || src_unit == dst_unit {
            continue; // still unresolved (a prior conflict already diagnosed it), or already agrees.
        }

        let mut current = from;
        let mut current_unit = src_unit;
        let mut hops = 0u32;
        let mut bridged = false;

        while hops < options.max_adapter_chain {
            if current_unit == dst_unit {
                bridged = true;
                break;
            }
            let Some(adapter) = find_unit_adapter(registry, current_unit) else {
                break;
            };
            let adapter_block = (adapter.instantiate)();
            let adapter_id = patch.insert_block(adapter_block);
            let adapter_in = PortId { block: adapter_id, index: 0, is_input: true };
            let adapter_out = PortId { block: adapter_id, index: 0, is_input: false };
            patch.insert_edge(current, adapter_in);
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::AdapterInserted,
                Severity::Info,
                TargetRef::Block(adapter_id),
                format!("inserted unit adapter '{}' on edge toward {to:?}", adapter.type_tag),
            ));
            current_unit = adapter.outputs[0].ty.unit;
            current = adapter_out;
            hops += 1;
        }

        if current_unit == dst_unit {
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
                format!("no unit adapter chain bridges {src_unit:?} to {dst_unit:?} within {} hops", options.max_adapter_chain),
            ));
        }
    }
}

fn find_unit_adapter(registry: &BlockRegistry, from_unit: Unit) -> Option<&'static BlockDef> {
    registry
        .iter_sorted()
        .find(|def| def.inputs.len() == 1 && def.outputs.len() == 1 && def.inputs[0].ty.unit == from_unit && def.outputs[0].ty.unit != from_unit)
}

fn assign(uf: &mut UnionFind, resolved: &mut FxHashMap<usize, Unit>, conflicted: &mut FxHashMap<usize, ()>, var: usize, unit: Unit) -> bool {
    let root = uf.find(var);
    match resolved.get(&root) {
        Some(&existing) if existing == unit => false,
        Some(_) => {
            conflicted.insert(root, ());
            false
        }
        None => {
            resolved.insert(root, unit);
            true
        }
    }
}

fn max_variable_id(patch: &Patch) -> Option<u32> {
    let mut max = None;
    for (_, block) in patch.iter_blocks() {
        for port in block.inputs.iter().map(|p| &p.ty).chain(block.outputs.iter().map(|p| &p.ty)) {
            if let Unit::Variable(v) = port.unit {
                max = Some(max.map_or(v, |m: u32| m.max(v)));
            }
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PortId;
    use crate::patch::block::{Block, InputPort, OutputPort};
    use crate::registry::{LowerFn, PortSpec, TimeTopology};
    use crate::types::{CanonicalType, Extent, Payload, PayloadKind};

    fn var_ty(v: u32) -> CanonicalType {
        CanonicalType {
            payload: Payload::Concrete(PayloadKind::Float),
            unit: Unit::Variable(v),
            extent: Extent::One,
        }
    }
    fn concrete_ty(u: Unit) -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, u, Extent::One)
    }

    fn noop_lower(_ctx: &mut crate::compiler::lowering::LowerCtx<'_>, _b: &Block, _id: crate::ident::BlockId) -> Result<(), crate::registry::LowerError> {
        Ok(())
    }

    #[test]
    fn unit_propagates_from_concrete_source() {
        let mut patch = Patch::new();
        let mut src = Block::new("Source");
        src.outputs.push(OutputPort::new_named("out".into(), concrete_ty(Unit::Turns)));
        let src_id = patch.insert_block(src);
        let mut sink = Block::new("Sink");
        sink.inputs.push(InputPort::new("in", var_ty(0)));
        let sink_id = patch.insert_block(sink);
        let from = PortId { block: src_id, index: 0, is_input: false };
        let to = PortId { block: sink_id, index: 0, is_input: true };
        patch.insert_edge(from, to);

        let registry = BlockRegistry::new();
        let mut diagnostics = DiagnosticSink::new();
        solve_units(&mut patch, &registry, CompileOptions::default(), &mut diagnostics);
        assert!(!diagnostics.has_blocking());
        assert_eq!(patch.block(sink_id).unwrap().inputs[0].ty.unit, Unit::Turns);
    }

    #[test]
    fn units_that_disagree_only_after_resolution_get_an_adapter_spliced_in() {
        // Both ports start out variable, so pass 3's adapter insertion can't
        // see a mismatch yet; once edge unification resolves both to
        // concrete-but-different units this pass has to catch it instead.
        fn instantiate_radians_to_turns() -> Block {
            let mut b = Block::new("RadiansToTurns");
            b.inputs.push(InputPort::new("in", concrete_ty(Unit::Radians)));
            b.outputs.push(OutputPort::new_named("out".into(), concrete_ty(Unit::Turns)));
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

        let mut registry = BlockRegistry::new();
        registry.register(&RADIANS_TO_TURNS);

        let mut patch = Patch::new();
        let mut src = Block::new("Source");
        src.outputs.push(OutputPort::new_named("out".into(), var_ty(0)));
        let src_id = patch.insert_block(src);
        let mut mid = Block::new("Mid");
        mid.inputs.push(InputPort::new("in", var_ty(0)));
        mid.outputs.push(OutputPort::new_named("out".into(), concrete_ty(Unit::Radians)));
        let mid_id = patch.insert_block(mid);
        let mut sink = Block::new("Sink");
        sink.inputs.push(InputPort::new("in", concrete_ty(Unit::Turns)));
        let sink_id = patch.insert_block(sink);

        patch.insert_edge(PortId { block: src_id, index: 0, is_input: false }, PortId { block: mid_id, index: 0, is_input: true });
        patch.insert_edge(PortId { block: mid_id, index: 0, is_input: false }, PortId { block: sink_id, index: 0, is_input: true });

        let mut diagnostics = DiagnosticSink::new();
        solve_units(&mut patch, &registry, CompileOptions::default(), &mut diagnostics);

        assert!(!diagnostics.has_blocking());
        assert_eq!(patch.iter_blocks().count(), 4, "adapter block should have been spliced onto the mid->sink edge");
    }

    #[test]
    fn units_with_no_conversion_path_are_diagnosed() {
        let registry = BlockRegistry::new();
        let mut patch = Patch::new();
        let mut src = Block::new("Source");
        src.outputs.push(OutputPort::new_named("out".into(), concrete_ty(Unit::Radians)));
        let src_id = patch.insert_block(src);
        let mut sink = Block::new("Sink");
        sink.inputs.push(InputPort::new("in", concrete_ty(Unit::Turns)));
        let sink_id = patch.insert_block(sink);
        patch.insert_edge(PortId { block: src_id, index: 0, is_input: false }, PortId { block: sink_id, index: 0, is_input: true });

        let mut diagnostics = DiagnosticSink::new();
        solve_units(&mut patch, &registry, CompileOptions::default(), &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }
}
