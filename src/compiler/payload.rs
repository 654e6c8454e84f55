//! Pass 1: payload resolution.
//!
//! Unifies `Payload::Variable` slots across edges, the same shape as
//! cardinality/unit solving but over payload kinds. Concrete payloads
//! propagate along edges until every variable is resolved or a conflict is
//! diagnosed.

use rustc_hash::FxHashMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::patch::block::{resolve_input, resolve_output};
use crate::patch::graph::Patch;
use crate::registry::BlockRegistry;
use crate::types::Payload;

use super::union_find::UnionFind;

/// Resolves every `Payload::Variable` in `patch`'s ports to a concrete
/// `PayloadKind`, unifying variables joined by an edge and propagating
/// concrete payloads across each resulting equivalence class.
pub fn resolve_payloads(patch: &mut Patch, _registry: &BlockRegistry, diagnostics: &mut DiagnosticSink) {
    let max_var = max_variable_id(patch);
    let Some(max_var) = max_var else { return };
    let class_count = max_var as usize + 1;
    let mut uf = UnionFind::new(class_count);

    for (_, edge) in patch.iter_edges() {
        let (Some(from_block), Some(to_block)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
            continue;
        };
        let (Some(out), Some(inp)) = (resolve_output(from_block, edge.from), resolve_input(to_block, edge.to)) else {
            continue;
        };
        if let (Payload::Variable(a), Payload::Variable(b)) = (out.ty.payload, inp.ty.payload) {
            uf.union(a as usize, b as usize);
        }
    }

    let mut resolved: FxHashMap<usize, crate::types::PayloadKind> = FxHashMap::default();
    let mut conflicted: FxHashMap<usize, ()> = FxHashMap::default();

    // Concrete payloads never carry a `Variable` id to union against, so the
    // only source of concreteness for a class is a directly-annotated
    // concrete port on one of its members. Re-walk edges, propagating known
    // concrete neighbor payloads into variable roots until a fixpoint.
    let mut changed = true;
    while changed {
        changed = false;
        for (_, edge) in patch.iter_edges() {
            let (Some(from_block), Some(to_block)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
                continue;
            };
            let (Some(out), Some(inp)) = (resolve_output(from_block, edge.from), resolve_input(to_block, edge.to)) else {
                continue;
            };
            if let (Payload::Concrete(k), Payload::Variable(v)) = (out.ty.payload, inp.ty.payload) {
                changed |= assign(&mut uf, &mut resolved, &mut conflicted, v as usize, k);
            }
            if let (Payload::Variable(v), Payload::Concrete(k)) = (out.ty.payload, inp.ty.payload) {
                changed |= assign(&mut uf, &mut resolved, &mut conflicted, v as usize, k);
            }
        }
    }

    for root in conflicted.keys() {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::ConflictingPayloads,
            Severity::Error,
            TargetRef::Patch,
            format!("payload variable class {root} was forced to two different concrete payloads"),
        ));
    }

    for (_, block) in patch.iter_blocks_mut() {
        for port in block.inputs.iter_mut().map(|p| &mut p.ty).chain(block.outputs.iter_mut().map(|p| &mut p.ty)) {
            if let Payload::Variable(v) = port.payload {
                let root = uf.find(v as usize);
                if let Some(&kind) = resolved.get(&root) {
                    port.payload = Payload::Concrete(kind);
                } else {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnresolvedPayload,
                        Severity::Error,
                        TargetRef::Patch,
                        format!("payload variable {v} never resolved to a concrete payload"),
                    ));
                }
            }
        }
    }
}

fn assign(uf: &mut UnionFind, resolved: &mut FxHashMap<usize, crate::types::PayloadKind>, conflicted: &mut FxHashMap<usize, ()>, var: usize, kind: crate::types::PayloadKind) -> bool {
    let root = uf.find(var);
    match resolved.get(&root) {
        Some(&existing) if existing == kind => false,
        Some(_) => {
            conflicted.insert(root, ());
            false
        }
        None => {
            resolved.insert(root, kind);
            true
        }
    }
}

fn max_variable_id(patch: &Patch) -> Option<u32> {
    let mut max = None;
    for (_, block) in patch.iter_blocks() {
        for port in block.inputs.iter().map(|p| &p.ty).chain(block.outputs.iter().map(|p| &p.ty)) {
            if let Payload::Variable(v) = port.payload {
                max = Some(max.map_or(v, |m: u32| m.max(v)));
            }
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::block::{Block, InputPort, OutputPort};
    use crate::types::{CanonicalType, Extent, PayloadKind, Unit};

    fn var_ty(v: u32) -> CanonicalType {
        CanonicalType {
            payload: Payload::Variable(v),
            unit: Unit::Scalar,
            extent: Extent::One,
        }
    }

    fn concrete_ty(k: PayloadKind) -> CanonicalType {
        CanonicalType::concrete(k, Unit::Scalar, Extent::One)
    }

    #[test]
    fn concrete_source_propagates_to_variable_sink() {
        let mut patch = Patch::new();
        let mut src = Block::new("Const");
        src.outputs.push(OutputPort::new_named("out".into(), concrete_ty(PayloadKind::Float)));
        let src_id = patch.insert_block(src);

        let mut sink = Block::new("Passthrough");
        sink.inputs.push(InputPort::new("in", var_ty(0)));
        let sink_id = patch.insert_block(sink);

        let from = crate::ident::PortId { block: src_id, index: 0, is_input: false };
        let to = crate::ident::PortId { block: sink_id, index: 0, is_input: true };
        patch.insert_edge(from, to);

        let registry = BlockRegistry::new();
        let mut diagnostics = DiagnosticSink::new();
        resolve_payloads(&mut patch, &registry, &mut diagnostics);

        assert!(!diagnostics.has_blocking());
        let sink_block = patch.block(sink_id).unwrap();
        assert_eq!(sink_block.inputs[0].ty.payload, Payload::Concrete(PayloadKind::Float));
    }

    #[test]
    fn unresolved_variable_is_diagnosed() {
        let mut patch = Patch::new();
        let mut b = Block::new("Orphan");
        b.inputs.push(InputPort::new("in", var_ty(0)));
        patch.insert_block(b);

        let registry = BlockRegistry::new();
        let mut diagnostics = DiagnosticSink::new();
        resolve_payloads(&mut patch, &registry, &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }
}
