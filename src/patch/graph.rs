//! `Patch`: an unordered set of blocks and a sequence of edges.
//!
//! `BTreeMap`-keyed storage so iteration order is deterministic without an
//! explicit sort at every call site, plus cascade-delete semantics —
//! deleting a block deletes its ports.

use std::collections::BTreeMap;

use crate::ident::{BlockId, EdgeId, PortId};
use crate::patch::block::Block;
use crate::patch::edge::Edge;

/// Structural invariant violations a `Patch` can have.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchInvariantError {
    /// An edge refers to a block that does not exist.
    #[error("edge {edge:?} references missing block {block:?}")]
    MissingBlock {
        /// The offending edge.
        edge: EdgeId,
        /// The missing block.
        block: BlockId,
    },
    /// An edge refers to a port index out of range for its block.
    #[error("edge {edge:?} references missing port {port:?}")]
    MissingPort {
        /// The offending edge.
        edge: EdgeId,
        /// The missing port.
        port: PortId,
    },
    /// Two edges share the same `(from, to)` pair.
    #[error("duplicate edge from {from:?} to {to:?}")]
    DuplicateEdge {
        /// Shared source.
        from: PortId,
        /// Shared destination.
        to: PortId,
    },
}

/// An unordered set of blocks and a sequence of edges.
#[derive(Clone, Debug, Default)]
pub struct Patch {
    blocks: BTreeMap<BlockId, Block>,
    edges: BTreeMap<EdgeId, Edge>,
    next_block: u32,
    next_edge: u32,
}

impl Patch {
    /// Constructs an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block, returning its newly assigned `BlockId`.
    pub fn insert_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, block);
        id
    }

    /// Inserts an edge, returning its newly assigned `EdgeId`.
    ///
    /// Note: duplicate `(from, to)` pairs are *not* rejected here; that is a
    /// structural invariant checked by [`Patch::check_invariants`], so a
    /// caller assembling a patch incrementally can observe the violation
    /// through diagnostics rather than a panic.
    pub fn insert_edge(&mut self, from: PortId, to: PortId) -> EdgeId {
        let id = EdgeId(self.next_edge);
        let sort_key = self.next_edge;
        self.next_edge += 1;
        self.edges.insert(id, Edge::new(from, to, sort_key));
        id
    }

    /// Deletes a block and cascades to every edge touching one of its ports.
    ///
    /// Returns `true` if the block existed.
    pub fn delete_block_cascade(&mut self, id: BlockId) -> bool {
        if self.blocks.remove(&id).is_none() {
            return false;
        }
        self.edges.retain(|_, e| e.from.block != id && e.to.block != id);
        true
    }

    /// Shared reference to a block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// Mutable reference to a block.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    /// Iterates blocks in deterministic `BlockId` order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().map(|(&id, b)| (id, b))
    }

    /// Iterates blocks mutably, in deterministic `BlockId` order. Used by
    /// solver passes that refine port types in place.
    pub fn iter_blocks_mut(&mut self) -> impl Iterator<Item = (BlockId, &mut Block)> {
        self.blocks.iter_mut().map(|(&id, b)| (id, b))
    }

    /// Iterates edges in deterministic `EdgeId` order. Use `Edge::sort_key`
    /// (not iteration order) wherever authoring order matters — `EdgeId`
    /// order and authoring order coincide only because `insert_edge`
    /// assigns both monotonically today; callers should not rely on that
    /// coincidence.
    pub fn iter_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().map(|(&id, e)| (id, e))
    }

    /// Repoints the source of the edge `old_from -> to` at `new_from`,
    /// preserving the edge's identity and sort key. Used by adapter
    /// insertion (pass 3) to splice an adapter chain between an edge's
    /// original endpoints without disturbing its position in writer order.
    ///
    /// Returns `true` if a matching edge was found and repointed.
    pub fn retarget_edge_source(&mut self, old_from: PortId, to: PortId, new_from: PortId) -> bool {
        for edge in self.edges.values_mut() {
            if edge.from == old_from && edge.to == to {
                edge.from = new_from;
                return true;
            }
        }
        false
    }

    /// All edges targeting `port`, sorted by `Edge::sort_key`.
    #[must_use]
    pub fn edges_into(&self, port: PortId) -> Vec<(EdgeId, &Edge)> {
        let mut v: Vec<_> = self
            .edges
            .iter()
            .filter(|(_, e)| e.to == port)
            .map(|(&id, e)| (id, e))
            .collect();
        v.sort_by_key(|(_, e)| e.sort_key);
        v
    }

    /// Checks the structural invariants: edges refer to
    /// existing ports, and no duplicate `(from, to)` pair exists.
    pub fn check_invariants(&self) -> Result<(), Vec<PatchInvariantError>> {
        let mut errors = Vec::new();
        let mut seen_pairs = std::collections::BTreeSet::new();

        for (&edge_id, edge) in &self.edges {
            for (dir, port) in [(edge.from, edge.from), (edge.to, edge.to)] {
                let _ = dir;
                let Some(block) = self.blocks.get(&port.block) else {
                    errors.push(PatchInvariantError::MissingBlock {
                        edge: edge_id,
                        block: port.block,
                    });
                    continue;
                };
                let exists = if port.is_input {
                    (port.index as usize) < block.inputs.len()
                } else {
                    (port.index as usize) < block.outputs.len()
                };
                if !exists {
                    errors.push(PatchInvariantError::MissingPort { edge: edge_id, port });
                }
            }
            let pair = (edge.from, edge.to);
            if !seen_pairs.insert(pair) {
                errors.push(PatchInvariantError::DuplicateEdge {
                    from: edge.from,
                    to: edge.to,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
