//! Property tests for the union-find shared by cardinality and unit solving:
//! after any sequence of unions, `connected` must agree with plain graph
//! reachability over the same edges, and `classes` must partition every
//! index exactly once.

use std::collections::VecDeque;

use patchgraph_core::compiler::union_find::UnionFind;
use proptest::collection::vec;
use proptest::prelude::*;

/// Connected components of the undirected graph formed by `edges` over `n`
/// nodes, via breadth-first search — independent of `UnionFind`'s own
/// internals, so agreement between the two is a real check and not a
/// tautology.
fn reference_components(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(a, b) in edges {
        adj[a].push(b);
        adj[b].push(a);
    }
    let mut component = vec![usize::MAX; n];
    let mut next_component = 0;
    for start in 0..n {
        if component[start] != usize::MAX {
            continue;
        }
        let mut queue = VecDeque::new();
        queue.push_back(start);
        component[start] = next_component;
        while let Some(node) = queue.pop_front() {
            for &neighbor in &adj[node] {
                if component[neighbor] == usize::MAX {
                    component[neighbor] = next_component;
                    queue.push_back(neighbor);
                }
            }
        }
        next_component += 1;
    }
    component
}

proptest! {
    #[test]
    fn connected_agrees_with_graph_reachability(
        n in 1usize..24,
        edges in vec((0usize..24, 0usize..24), 0..40),
    ) {
        let edges: Vec<(usize, usize)> = edges.into_iter().map(|(a, b)| (a % n, b % n)).collect();
        let mut uf = UnionFind::new(n);
        for &(a, b) in &edges {
            uf.union(a, b);
        }
        let component = reference_components(n, &edges);

        for a in 0..n {
            for b in 0..n {
                prop_assert_eq!(uf.connected(a, b), component[a] == component[b]);
            }
        }
    }

    #[test]
    fn classes_partition_every_index_exactly_once(
        n in 1usize..24,
        edges in vec((0usize..24, 0usize..24), 0..40),
    ) {
        let edges: Vec<(usize, usize)> = edges.into_iter().map(|(a, b)| (a % n, b % n)).collect();
        let mut uf = UnionFind::new(n);
        for &(a, b) in &edges {
            uf.union(a, b);
        }
        let classes = uf.classes();

        let mut seen = vec![false; n];
        for members in classes.values() {
            for &m in members {
                prop_assert!(!seen[m], "index {} appeared in more than one class", m);
                seen[m] = true;
            }
        }
        prop_assert!(seen.iter().all(|&s| s), "every index must appear in exactly one class");
    }
}
