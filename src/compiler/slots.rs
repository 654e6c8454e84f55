//! Pass 11: slot/link planning. Slot storage was already
//! allocated incrementally as each block lowered (`LowerCtx::alloc_value_slot`
//! / `alloc_shape2d_slot`); this pass is the final assembly into the
//! compiler's immutable output, the seam where a future slot-packing
//! optimization (e.g. coalescing same-kind single-lane slots) would slot in
//! without touching any earlier pass.

use crate::program::CompiledProgram;

use super::lowering::LoweredPatch;

/// Assembles a scheduled, lowered patch into its final immutable program.
#[must_use]
pub fn finalize_program(scheduled: LoweredPatch) -> CompiledProgram {
    CompiledProgram {
        steps: scheduled.steps,
        exprs: scheduled.exprs,
        slots: scheduled.slots,
        lane_counts: scheduled.lane_counts.into_iter().collect(),
        identity_vectors: scheduled.identity_vectors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ExprBuilder;
    use crate::program::SlotTable;
    use std::collections::BTreeMap;

    #[test]
    fn finalize_preserves_slot_count() {
        let mut slots = SlotTable::new();
        slots.allocate(crate::program::SlotKind::F32, 1);
        let lowered = LoweredPatch {
            exprs: ExprBuilder::new(),
            slots,
            steps: Vec::new(),
            lane_counts: Default::default(),
            identity_vectors: BTreeMap::new(),
        };
        let program = finalize_program(lowered);
        assert_eq!(program.slots.len(), 1);
    }
}
