//! Hot-swap driver: sequences a compiled-program swap so the
//! runtime never serves a half-migrated frame. The old program keeps
//! rendering while a warm-up tick primes the new one; the swap itself
//! happens only at a frame boundary, atomically, from the caller's
//! perspective.
//!
//! A swap's bookkeeping (what migrated, what reset) is returned as data
//! rather than logged as a side effect, handed back to the caller instead
//! of written straight to a shared log.

use crate::continuity::DuplicatePolicy;
use crate::program::CompiledProgram;
use crate::runtime::{MigrationOutcome, RuntimeError, RuntimeState, TickOutput};
use crate::telemetry::TelemetrySink;

/// A compiled program tagged with the patch revision it was built from.
pub struct Revisioned<'a> {
    /// Monotonically increasing patch revision this program was compiled
    /// from.
    pub revision: u64,
    /// The program itself.
    pub program: &'a CompiledProgram,
}

/// What a completed swap produced.
pub struct SwapResult {
    /// The runtime to adopt in place of the old one, already warmed up.
    pub runtime: RuntimeState,
    /// The warm-up tick's output; the caller decides whether to discard it
    /// or treat it as the first real frame on the new program.
    pub warm_up_output: TickOutput,
    /// Per-`StateId` migration accounting.
    pub outcome: MigrationOutcome,
    /// Revision swapped from.
    pub from_revision: u64,
    /// Revision swapped to.
    pub to_revision: u64,
}

/// Attempts a hot swap from `old` to `new`. Returns `Ok(None)` if the two
/// programs fingerprint identically, in which case the caller should keep
/// running `old_runtime` unchanged.
///
/// `t_model_ms` drives the warm-up tick; the caller must not advance
/// `old_runtime` with this same timestamp, since only one of the two
/// runtimes survives past this call. `duplicate_policy` governs how a
/// duplicate id in a migrated state's identity vector is handled; see
/// [`RuntimeState::migrate`].
pub fn swap(old: &Revisioned<'_>, old_runtime: &RuntimeState, new: &Revisioned<'_>, t_model_ms: u64, duplicate_policy: DuplicatePolicy) -> Result<Option<SwapResult>, RuntimeError> {
    swap_with_telemetry(old, old_runtime, new, t_model_ms, duplicate_policy, &crate::telemetry::NullTelemetrySink)
}

/// Same as [`swap`], reporting a `ProgramSwapped` event to `sink` when a
/// swap actually happens (not when the short circuit above fires).
pub fn swap_with_telemetry(
    old: &Revisioned<'_>,
    old_runtime: &RuntimeState,
    new: &Revisioned<'_>,
    t_model_ms: u64,
    duplicate_policy: DuplicatePolicy,
    sink: &dyn TelemetrySink,
) -> Result<Option<SwapResult>, RuntimeError> {
    if old.program.fingerprint() == new.program.fingerprint() {
        return Ok(None);
    }

    let (mut runtime, outcome) = RuntimeState::migrate(new.program, old.program, old_runtime, duplicate_policy);
    let warm_up_output = runtime.tick(new.program, t_model_ms)?;
    sink.program_swapped(old.revision, new.revision, &new.program.fingerprint());

    Ok(Some(SwapResult {
        runtime,
        warm_up_output,
        outcome,
        from_revision: old.revision,
        to_revision: new.revision,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::make_state_id;
    use crate::ir::{ConstValue, ExprBuilder};
    use crate::program::{SlotKind, SlotTable, Step};
    use crate::types::{CanonicalType, Extent, PayloadKind, Unit};

    fn scalar_ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One)
    }

    fn build_counter_program() -> CompiledProgram {
        let mut exprs = ExprBuilder::new();
        let sid = make_state_id("counter");
        let prev = exprs.state_read(sid, scalar_ty());
        let one = exprs.const_value(ConstValue::Float(1.0), scalar_ty());
        let next = exprs.opcode(crate::eval::Opcode::Add, vec![prev, one], scalar_ty());
        let mut slots = SlotTable::new();
        let slot = slots.allocate(SlotKind::F32, 1);
        CompiledProgram {
            steps: vec![Step::EvalSignal { expr: prev, out_slot: slot }, Step::StateWrite { state: sid, value: next }],
            exprs,
            slots,
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        }
    }

    #[test]
    fn identical_fingerprint_short_circuits() {
        let program = build_counter_program();
        let runtime = RuntimeState::new(&program);
        let old = Revisioned { revision: 1, program: &program };
        let same = Revisioned { revision: 2, program: &program };
        assert!(swap(&old, &runtime, &same, 16, DuplicatePolicy::Strict).expect("identical fingerprint never ticks").is_none());
    }

    #[test]
    fn surviving_state_is_direct_copied_across_a_swap() {
        let program_a = build_counter_program();
        let mut runtime = RuntimeState::new(&program_a);
        runtime.tick(&program_a, 16).expect("first tick always succeeds");
        runtime.tick(&program_a, 32).expect("second tick advances monotonically");
        assert_eq!(runtime.banks().f32_bank[0], 1.0);

        let mut program_b = build_counter_program();
        let extra = program_b.exprs.const_value(ConstValue::Float(9.0), scalar_ty());
        let extra_slot = program_b.slots.allocate(SlotKind::F32, 1);
        program_b.steps.push(Step::EvalSignal { expr: extra, out_slot: extra_slot });

        let old = Revisioned { revision: 1, program: &program_a };
        let new = Revisioned { revision: 2, program: &program_b };
        let result = swap(&old, &runtime, &new, 48, DuplicatePolicy::Strict)
            .expect("warm-up tick succeeds")
            .expect("shapes differ, swap should run");
        assert_eq!(result.outcome.direct_copied, 1);
        assert_eq!(result.outcome.migrated, 0);
        assert_eq!(result.from_revision, 1);
        assert_eq!(result.to_revision, 2);
        assert_eq!(result.runtime.banks().f32_bank[0], 1.0, "migrated counter should keep its committed value through the warm-up tick");
    }

    #[test]
    fn removed_state_is_discarded_and_new_state_is_initialized() {
        let program_a = build_counter_program();
        let runtime = RuntimeState::new(&program_a);

        let mut exprs = ExprBuilder::new();
        let other_sid = make_state_id("other");
        let c = exprs.const_value(ConstValue::Float(0.0), scalar_ty());
        let mut slots = SlotTable::new();
        let program_c = CompiledProgram {
            steps: vec![Step::StateWrite { state: other_sid, value: c }],
            exprs,
            slots: {
                slots.allocate(SlotKind::F32, 1);
                slots
            },
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };

        let old = Revisioned { revision: 1, program: &program_a };
        let new = Revisioned { revision: 2, program: &program_c };
        let result = swap(&old, &runtime, &new, 16, DuplicatePolicy::Strict)
            .expect("warm-up tick succeeds")
            .expect("distinct state sets, swap should run");
        assert_eq!(result.outcome.discarded, 1, "counter had no counterpart in the new program");
        assert_eq!(result.outcome.initialized, 1, "other had no counterpart in the old program");
    }
}
