//! Pass 7: time topology assignment. Reads each block's
//! registry-declared role; carries no solving of its own, just a lookup, but
//! lives as a distinct pass because later passes (cycle analysis, lowering)
//! both depend on having it resolved once rather than re-querying the
//! registry per block.

use std::collections::BTreeMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::ident::BlockId;
use crate::patch::graph::Patch;
use crate::registry::{BlockRegistry, TimeTopology};

/// Per-block time-topology roles for one compilation.
#[derive(Clone, Default, Debug)]
pub struct Topology {
    roles: BTreeMap<BlockId, TimeTopology>,
}

impl Topology {
    /// Records a block's time topology role. `pub(crate)` since only this
    /// pass and its tests construct a `Topology` from scratch.
    pub(crate) fn insert(&mut self, id: BlockId, role: TimeTopology) {
        self.roles.insert(id, role);
    }

    /// This block's role, if known (unknown block types were already
    /// diagnosed by earlier passes).
    #[must_use]
    pub fn role(&self, id: BlockId) -> Option<TimeTopology> {
        self.roles.get(&id).copied()
    }

    /// `true` if `id` is a stateful block.
    #[must_use]
    pub fn is_stateful(&self, id: BlockId) -> bool {
        matches!(self.role(id), Some(TimeTopology::Stateful))
    }
}

/// Assigns every block its registry-declared time topology role.
pub fn assign_time_topology(patch: &Patch, registry: &BlockRegistry, diagnostics: &mut DiagnosticSink) -> Topology {
    let mut topology = Topology::default();
    for (id, block) in patch.iter_blocks() {
        match registry.lookup(&block.type_tag) {
            Ok(def) => {
                topology.insert(id, def.time_topology);
            }
            Err(_) => {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnresolvedPayload,
                    Severity::Error,
                    TargetRef::Block(id),
                    format!("unknown block type '{}'", block.type_tag),
                ));
            }
        }
    }
    topology
}
