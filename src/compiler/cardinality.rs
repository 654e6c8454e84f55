//! Pass 4: cardinality solving.
//!
//! Unifies `Extent::Variable` slots across edges, exactly like payload
//! resolution but over `(is_many, domain)` rather than a payload kind, then
//! resolves each zip-block's broadcast group on top of that: a zip-member
//! input is allowed to stay `one` (plain broadcast) while its siblings carry
//! a real `many` domain, which a plain edge-unification pass alone can't
//! express.
//!
//! Five phases: (1) one union-find node per variable, plus each block's
//! zip-member inputs collected into a broadcast group; (2) those group
//! members are the candidates for a `pendingOne` commit; (3) every edge's
//! endpoints are unioned and propagated to a fixpoint, exactly like pass 1;
//! (4) each group is resolved — find the group's strongest `many` witness,
//! commit `one` to unresolved members not aliased with a sibling zip block's
//! own output, assign the witness to whatever's left, then carry the same
//! verdict onto the owning block's own output (itself a zipBroadcast output
//! port a downstream group's guard must respect); (5) write back, poisoning
//! a class that was forced to two different concrete extents.
//!
//! Carries the same union-find root-poison guard as payload resolution: once
//! a class has been forced to two different concrete extents, it stays
//! poisoned even if a later member happens to match one of the earlier
//! conflicting values. Without the guard, assignment order alone could
//! decide whether a three-way conflict (`one`, `many(A)`, `many(A)` again) is
//! silently accepted or rejected, which would make compilation
//! non-deterministic with respect to edge insertion order.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::BlockId;
use crate::patch::block::{resolve_input, resolve_output};
use crate::patch::graph::Patch;
use crate::registry::BlockRegistry;
use crate::types::Extent;

use super::union_find::UnionFind;

/// Resolves every `Extent::Variable` in `patch`'s ports to a concrete
/// `Extent` (`One` or `Many(domain)`).
pub fn solve_cardinality(patch: &mut Patch, _registry: &BlockRegistry, diagnostics: &mut DiagnosticSink) {
    let Some(max_var) = max_variable_id(patch) else { return };
    let mut uf = UnionFind::new(max_var as usize + 1);

    // Phase 1: zipBroadcast groups, scoped per owning block, over that
    // block's own zip-member input ports. A block with no zip-member inputs
    // has no group and never enters phase 4.
    let mut groups: BTreeMap<BlockId, Vec<u32>> = BTreeMap::new();
    for (id, block) in patch.iter_blocks() {
        for port in &block.inputs {
            if port.zip_member {
                if let Extent::Variable(v) = port.ty.extent {
                    groups.entry(id).or_default().push(v);
                }
            }
        }
    }

    // Phase 3: union every edge's variable endpoints.
    for (_, edge) in patch.iter_edges() {
        let (Some(fb), Some(tb)) = (patch.block(edge.from.block), patch.block(edge.to.block)) else {
            continue;
        };
        let (Some(out), Some(inp)) = (resolve_output(fb, edge.from), resolve_input(tb, edge.to)) else {
            continue;
        };
        if let (Extent::Variable(a), Extent::Variable(b)) = (out.ty.extent, inp.ty.extent) {
            uf.union(a as usize, b as usize);
        }
    }

    let mut resolved: FxHashMap<usize, Extent> = FxHashMap::default();
    let mut poisoned: FxHashMap<usize, ()> = FxHashMap::default();

    // Propagate every concrete edge endpoint onto its class, to fixpoint.
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
            if let (concrete, Extent::Variable(v)) = (out.ty.extent, inp.ty.extent) {
                if !concrete.is_variable() {
                    changed |= assign(&mut uf, &mut resolved, &mut poisoned, v as usize, concrete);
                }
            }
            if let (Extent::Variable(v), concrete) = (out.ty.extent, inp.ty.extent) {
                if !concrete.is_variable() {
                    changed |= assign(&mut uf, &mut resolved, &mut poisoned, v as usize, concrete);
                }
            }
        }
    }

    // Phase 4: resolve each zipBroadcast group against the fixpoint reached
    // above. `zip_output_roots` collects, per owning block, the UF roots of
    // that block's own output variables — a sibling zip block's output root
    // showing up here is exactly the case the pendingOne guard must not
    // poison to `one`.
    let zip_output_roots: FxHashMap<BlockId, Vec<usize>> = groups
        .keys()
        .filter_map(|&owner| {
            let block = patch.block(owner)?;
            let roots: Vec<usize> = block
                .outputs
                .iter()
                .filter_map(|p| match p.ty.extent {
                    Extent::Variable(v) => Some(uf.find(v as usize)),
                    _ => None,
                })
                .collect();
            Some((owner, roots))
        })
        .collect();

    for (&owner, members) in &groups {
        let mut best_many: Option<Extent> = None;
        let mut conflicting = false;
        for &v in members {
            if let Some(&extent) = resolved.get(&uf.find(v as usize)) {
                if matches!(extent, Extent::Many(_)) {
                    match best_many {
                        None => best_many = Some(extent),
                        Some(existing) if extents_equal(existing, extent) => {}
                        Some(_) => conflicting = true,
                    }
                }
            }
        }
        if conflicting {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ConflictingCardinalities,
                Severity::Error,
                TargetRef::Block(owner),
                "zip block's broadcast group disagrees on a many-cardinality domain",
            ));
            continue;
        }

        let foreign_output_roots: Vec<usize> = zip_output_roots.iter().filter(|(&b, _)| b != owner).flat_map(|(_, roots)| roots.iter().copied()).collect();

        // pendingOne commit: an unresolved member not aliased with a
        // sibling zip block's own output defaults to `one`.
        for &v in members {
            let root = uf.find(v as usize);
            if resolved.contains_key(&root) || poisoned.contains_key(&root) {
                continue;
            }
            if !foreign_output_roots.contains(&root) {
                assign(&mut uf, &mut resolved, &mut poisoned, v as usize, Extent::One);
            }
        }

        // Whatever's still unresolved (guarded off from `one` above) takes
        // the group's many-cardinality witness, if it found one.
        if let Some(many) = best_many {
            for &v in members {
                let root = uf.find(v as usize);
                if !resolved.contains_key(&root) && !poisoned.contains_key(&root) {
                    assign(&mut uf, &mut resolved, &mut poisoned, v as usize, many);
                }
            }
        }

        // The block's own output carries the group's verdict: `many` if the
        // group found a witness, `one` otherwise. This is itself a
        // zipBroadcast output port, so a downstream group's pendingOne
        // commit must see it through the same guard above before it settles.
        if let Some(block) = patch.block(owner) {
            let output_vars: Vec<u32> = block.outputs.iter().filter_map(|p| if let Extent::Variable(v) = p.ty.extent { Some(v) } else { None }).collect();
            for v in output_vars {
                let root = uf.find(v as usize);
                if resolved.contains_key(&root) || poisoned.contains_key(&root) {
                    continue;
                }
                assign(&mut uf, &mut resolved, &mut poisoned, v as usize, best_many.unwrap_or(Extent::One));
            }
        }
    }

    // Phase 5: writeback.
    for root in poisoned.keys() {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::ConflictingCardinalities,
            Severity::Error,
            TargetRef::Patch,
            format!("cardinality variable class {root} was forced to two different concrete extents"),
        ));
    }

    for (_, block) in patch.iter_blocks_mut() {
        for port in block.inputs.iter_mut().map(|p| &mut p.ty).chain(block.outputs.iter_mut().map(|p| &mut p.ty)) {
            if let Extent::Variable(v) = port.extent {
                let root = uf.find(v as usize);
                if poisoned.contains_key(&root) {
                    continue; // already diagnosed; never silently resolve a poisoned class.
                }
                if let Some(&extent) = resolved.get(&root) {
                    port.extent = extent;
                } else {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnresolvedCardinality,
                        Severity::Error,
                        TargetRef::Patch,
                        format!("cardinality variable {v} never resolved to a concrete extent"),
                    ));
                }
            }
        }
    }
}

fn assign(uf: &mut UnionFind, resolved: &mut FxHashMap<usize, Extent>, poisoned: &mut FxHashMap<usize, ()>, var: usize, extent: Extent) -> bool {
    let root = uf.find(var);
    if poisoned.contains_key(&root) {
        return false;
    }
    match resolved.get(&root) {
        Some(existing) if extents_equal(*existing, extent) => false,
        Some(_) => {
            poisoned.insert(root, ());
            false
        }
        None => {
            resolved.insert(root, extent);
            true
        }
    }
}

fn extents_equal(a: Extent, b: Extent) -> bool {
    matches!((a, b), (Extent::One, Extent::One)) || matches!((a, b), (Extent::Many(x), Extent::Many(y)) if x == y)
}

fn max_variable_id(patch: &Patch) -> Option<u32> {
    let mut max = None;
    for (_, block) in patch.iter_blocks() {
        for port in block.inputs.iter().map(|p| &p.ty).chain(block.outputs.iter().map(|p| &p.ty)) {
            if let Extent::Variable(v) = port.extent {
                max = Some(max.map_or(v, |m: u32| m.max(v)));
            }
        }
    }
    max
}
