//! Pass 10: schedule construction. Lowering (pass 9) already
//! emits steps in block dependency order; this pass just stabilizes that
//! into the final phase partition — every Phase 1 (evaluate) step before
//! every Phase 2 (commit) step, each half keeping its emission-order
//! relative sequence (a stable partition, not a resort) so no dependency
//! lowering established is disturbed.

use crate::program::{Phase, Step};

use super::lowering::LoweredPatch;

/// Stabilizes `lowered.steps` into the evaluate/commit phase partition.
#[must_use]
pub fn build_schedule(mut lowered: LoweredPatch) -> LoweredPatch {
    let (evaluate, commit): (Vec<Step>, Vec<Step>) = lowered.steps.drain(..).partition(|s| matches!(s.phase(), Phase::Evaluate));
    lowered.steps = evaluate;
    lowered.steps.extend(commit);
    lowered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{ExprId, SlotId, StateId};
    use crate::ir::ExprBuilder;
    use crate::program::SlotTable;
    use std::collections::BTreeMap;

    #[test]
    fn commit_steps_move_after_evaluate_steps_keeping_relative_order() {
        let steps = vec![
            Step::StateWrite {
                state: StateId([1; 32]),
                value: ExprId([0; 32]),
            },
            Step::EvalSignal {
                expr: ExprId([2; 32]),
                out_slot: SlotId(0),
            },
            Step::StateWrite {
                state: StateId([3; 32]),
                value: ExprId([0; 32]),
            },
        ];
        let lowered = LoweredPatch {
            exprs: ExprBuilder::new(),
            slots: SlotTable::new(),
            steps,
            lane_counts: Default::default(),
            identity_vectors: BTreeMap::new(),
        };
        let scheduled = build_schedule(lowered);
        assert!(matches!(scheduled.steps[0], Step::EvalSignal { .. }));
        assert!(matches!(scheduled.steps[1], Step::StateWrite { state, .. } if state.0[0] == 1));
        assert!(matches!(scheduled.steps[2], Step::StateWrite { state, .. } if state.0[0] == 3));
    }
}
