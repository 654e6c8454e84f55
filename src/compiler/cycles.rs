//! Pass 8: dependency and cycle analysis. A feedback loop is
//! legal only if it crosses at least one stateful block, since a stateful
//! block reads its inputs from the previous frame's committed state rather
//! than the current frame's evaluation — that's what breaks the cycle at
//! runtime. Everything else closing a loop without crossing state is a
//! genuine same-frame dependency cycle and cannot be scheduled.

use std::collections::BTreeMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::BlockId;
use crate::patch::graph::Patch;

use super::time_topology::Topology;

/// A block-level dependency order with the legal feedback loops already
/// accounted for: `order` is a valid evaluation order for the DAG obtained
/// by dropping edges that feed a stateful block's input (those reads come
/// from last frame, not this one).
#[derive(Clone, Debug, Default)]
pub struct DependencyOrder {
    /// Blocks in an order where every stateless dependency precedes its
    /// dependents.
    pub order: Vec<BlockId>,
}

/// Runs Tarjan's algorithm over the full block dependency graph (every edge,
/// without exception) to find cycles, diagnoses any cycle that never touches
/// a stateful block, then builds an evaluation order over the reduced graph
/// that drops edges into stateful blocks.
pub fn check_cycles(patch: &Patch, topology: &Topology, diagnostics: &mut DiagnosticSink) -> DependencyOrder {
    let ids: Vec<BlockId> = patch.iter_blocks().map(|(id, _)| id).collect();
    let mut full_adj: BTreeMap<BlockId, Vec<BlockId>> = ids.iter().map(|&id| (id, Vec::new())).collect();
    for (_, edge) in patch.iter_edges() {
        full_adj.entry(edge.from.block).or_default().push(edge.to.block);
    }

    for scc in tarjan_sccs(&ids, &full_adj) {
        let is_cycle = scc.len() > 1 || full_adj.get(&scc[0]).is_some_and(|outs| outs.contains(&scc[0]));
        if !is_cycle {
            continue;
        }
        let crosses_state = scc.iter().any(|&id| topology.is_stateful(id));
        if !crosses_state {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::CycleWithoutState,
                Severity::Error,
                TargetRef::Block(scc[0]),
                format!("dependency cycle of {} block(s) closes without crossing a stateful block", scc.len()),
            ));
        }
    }

    let mut reduced_adj: BTreeMap<BlockId, Vec<BlockId>> = ids.iter().map(|&id| (id, Vec::new())).collect();
    for (_, edge) in patch.iter_edges() {
        if topology.is_stateful(edge.to.block) {
            continue; // read from last frame's committed state, not a same-frame dependency.
        }
        reduced_adj.entry(edge.from.block).or_default().push(edge.to.block);
    }

    DependencyOrder {
        order: topological_order(&ids, &reduced_adj),
    }
}

/// Tarjan's strongly connected components algorithm. Returns SCCs in an
/// arbitrary but deterministic order (discovery order over `ids`, which is
/// itself sorted ascending since `ids` comes from a `BTreeMap` iteration).
fn tarjan_sccs(ids: &[BlockId], adj: &BTreeMap<BlockId, Vec<BlockId>>) -> Vec<Vec<BlockId>> {
    struct State {
        index: BTreeMap<BlockId, u32>,
        lowlink: BTreeMap<BlockId, u32>,
        on_stack: BTreeMap<BlockId, bool>,
        stack: Vec<BlockId>,
        next_index: u32,
        sccs: Vec<Vec<BlockId>>,
    }

    fn strongconnect(v: BlockId, adj: &BTreeMap<BlockId, Vec<BlockId>>, s: &mut State) {
        s.index.insert(v, s.next_index);
        s.lowlink.insert(v, s.next_index);
        s.next_index += 1;
        s.stack.push(v);
        s.on_stack.insert(v, true);

        if let Some(successors) = adj.get(&v) {
            for &w in successors {
                if !s.index.contains_key(&w) {
                    strongconnect(w, adj, s);
                    let wl = s.lowlink[&w];
                    let vl = s.lowlink[&v];
                    s.lowlink.insert(v, vl.min(wl));
                } else if *s.on_stack.get(&w).unwrap_or(&false) {
                    let wi = s.index[&w];
                    let vl = s.lowlink[&v];
                    s.lowlink.insert(v, vl.min(wi));
                }
            }
        }

        if s.lowlink[&v] == s.index[&v] {
            let mut component = Vec::new();
            loop {
                let w = s.stack.pop().expect("strongconnect stack underflow");
                s.on_stack.insert(w, false);
                component.push(w);
                if w == v {
                    break;
                }
            }
            s.sccs.push(component);
        }
    }

    let mut state = State {
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeMap::new(),
        stack: Vec::new(),
        next_index: 0,
        sccs: Vec::new(),
    };
    for &id in ids {
        if !state.index.contains_key(&id) {
            strongconnect(id, adj, &mut state);
        }
    }
    state.sccs
}

/// Kahn's algorithm over the reduced (stateful-input-dropped) graph, with a
/// deterministic tie-break on `BlockId` ascending among ready nodes.
fn topological_order(ids: &[BlockId], adj: &BTreeMap<BlockId, Vec<BlockId>>) -> Vec<BlockId> {
    let mut in_degree: BTreeMap<BlockId, u32> = ids.iter().map(|&id| (id, 0)).collect();
    for successors in adj.values() {
        for &to in successors {
            *in_degree.entry(to).or_insert(0) += 1;
        }
    }

    let mut ready: Vec<BlockId> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
    ready.sort_unstable_by(|a, b| b.cmp(a));
    let mut order = Vec::with_capacity(ids.len());

    while let Some(next) = ready.pop() {
        order.push(next);
        if let Some(successors) = adj.get(&next) {
            let mut newly_ready = Vec::new();
            for &to in successors {
                let deg = in_degree.get_mut(&to).expect("successor missing from in-degree map");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(to);
                }
            }
            ready.extend(newly_ready);
            ready.sort_unstable_by(|a, b| b.cmp(a));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::PortId;
    use crate::patch::block::Block;
    use crate::registry::TimeTopology;

    fn wire(patch: &mut Patch, from: BlockId, to: BlockId) {
        patch.insert_edge(
            PortId { block: from, index: 0, is_input: false },
            PortId { block: to, index: 0, is_input: true },
        );
    }

    #[test]
    fn self_loop_through_stateful_block_is_legal() {
        let mut patch = Patch::new();
        let a = patch.insert_block(Block::new("Delay"));
        wire(&mut patch, a, a);

        let mut topology = Topology::default();
        topology.insert(a, TimeTopology::Stateful);

        let mut diagnostics = DiagnosticSink::new();
        check_cycles(&patch, &topology, &mut diagnostics);
        assert!(!diagnostics.has_blocking());
    }

    #[test]
    fn cycle_without_state_is_rejected() {
        let mut patch = Patch::new();
        let a = patch.insert_block(Block::new("A"));
        let b = patch.insert_block(Block::new("B"));
        wire(&mut patch, a, b);
        wire(&mut patch, b, a);

        let mut topology = Topology::default();
        topology.insert(a, TimeTopology::Stateless);
        topology.insert(b, TimeTopology::Stateless);

        let mut diagnostics = DiagnosticSink::new();
        check_cycles(&patch, &topology, &mut diagnostics);
        assert!(diagnostics.has_blocking());
    }

    #[test]
    fn linear_chain_orders_upstream_before_downstream() {
        let mut patch = Patch::new();
        let a = patch.insert_block(Block::new("A"));
        let b = patch.insert_block(Block::new("B"));
        let c = patch.insert_block(Block::new("C"));
        wire(&mut patch, a, b);
        wire(&mut patch, b, c);

        let mut topology = Topology::default();
        topology.insert(a, TimeTopology::Stateless);
        topology.insert(b, TimeTopology::Stateless);
        topology.insert(c, TimeTopology::Stateless);

        let mut diagnostics = DiagnosticSink::new();
        let deps = check_cycles(&patch, &topology, &mut diagnostics);
        assert!(!diagnostics.has_blocking());
        let pos = |id: BlockId| deps.order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }
}
