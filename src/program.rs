//! `CompiledProgram`: the compiler's sole output. Immutable once
//! built; the runtime only ever reads it.
//!
//! Stored records are kept as plain, opaque data — the schedule doesn't
//! know *why* a step exists, the same way a `NodeRecord`/`EdgeRecord` pair
//! doesn't know why a graph edit touched them.

use std::collections::BTreeMap;

use blake3::Hasher;
use rustc_hash::FxHashMap;

use crate::continuity::{ContinuityPolicy, DuplicatePolicy};
use crate::eval::Easing;
use crate::ident::{BlockId, ExprId, Hash, InstanceId, SlotId, StateId, TargetId};
use crate::ir::ExprBuilder;

/// Which storage bank a slot belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SlotKind {
    /// `f32` lane storage.
    F32,
    /// `i32` lane storage.
    I32,
    /// `u32` lane storage (bit-reinterpreted bools, enum tags).
    U32,
    /// Packed 8xu32 `shape2d` topology record.
    Shape2d,
}

/// A slot's location within its storage bank: a contiguous run of `count`
/// lanes starting at `offset` (1 lane for a signal, `N` for a field).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlotLayout {
    /// Storage bank this slot lives in.
    pub kind: SlotKind,
    /// Lane offset within the bank.
    pub offset: u32,
    /// Number of contiguous lanes this slot occupies.
    pub count: u32,
}

/// Contiguous per-kind storage layout for every slot allocated during
/// compilation. Offsets are assigned in allocation order and are stable
/// across recompiles of a structurally-unchanged patch; hot-swap
/// migration relies on this for slots whose `SlotId` didn't change.
#[derive(Clone, Default, Debug)]
pub struct SlotTable {
    layouts: Vec<SlotLayout>,
    bank_lens: [u32; 4],
}

impl SlotTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bank_index(kind: SlotKind) -> usize {
        match kind {
            SlotKind::F32 => 0,
            SlotKind::I32 => 1,
            SlotKind::U32 => 2,
            SlotKind::Shape2d => 3,
        }
    }

    /// Allocates a new slot of `count` contiguous lanes in `kind`'s bank,
    /// returning its id.
    pub fn allocate(&mut self, kind: SlotKind, count: u32) -> SlotId {
        let id = SlotId(u32::try_from(self.layouts.len()).unwrap_or(u32::MAX));
        let bank = Self::bank_index(kind);
        let offset = self.bank_lens[bank];
        self.bank_lens[bank] += count;
        self.layouts.push(SlotLayout { kind, offset, count });
        id
    }

    /// The layout of a previously-allocated slot.
    #[must_use]
    pub fn layout(&self, slot: SlotId) -> Option<SlotLayout> {
        self.layouts.get(slot.0 as usize).copied()
    }

    /// Total lane count reserved for `kind`'s bank.
    #[must_use]
    pub fn bank_len(&self, kind: SlotKind) -> u32 {
        self.bank_lens[Self::bank_index(kind)]
    }

    /// Number of slots allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// `true` if no slots have been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Which half of the per-frame executor a step belongs to: Phase 1
/// evaluate, Phase 2 commit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Signals, field materialization, continuity, events, render-pass
    /// collection. State reads return the *previous* frame's value.
    Evaluate,
    /// State writes, visible only from the *next* frame's Phase 1.
    Commit,
}

/// One entry in a `CompiledProgram`'s flat schedule.
#[derive(Clone, Debug)]
pub enum Step {
    /// Evaluates a one-valued (`Extent::One`) expression into a slot.
    EvalSignal {
        /// Expression to evaluate.
        expr: ExprId,
        /// Destination slot.
        out_slot: SlotId,
    },
    /// Materializes a field expression across every lane of `domain` into a
    /// slot.
    Materialize {
        /// Expression to evaluate per-lane.
        expr: ExprId,
        /// Instance domain the expression is keyed to.
        domain: InstanceId,
        /// Destination slot (one lane's worth of storage per domain member).
        out_slot: SlotId,
    },
    /// Writes a stateful block's new (one-valued) state, visible next frame.
    StateWrite {
        /// Target state identifier.
        state: StateId,
        /// New value expression.
        value: ExprId,
    },
    /// Writes a stateful block's new field-valued state, visible next frame.
    FieldStateWrite {
        /// Target state identifier.
        state: StateId,
        /// Instance domain the field is keyed to.
        domain: InstanceId,
        /// New value expression, evaluated per-lane.
        value: ExprId,
    },
    /// Evaluates a discrete event condition; a `true` result is recorded for
    /// this frame only.
    Event {
        /// Owning block.
        block: BlockId,
        /// Condition expression.
        condition: ExprId,
    },
    /// Collects one render pass's resolved inputs for the render assembler.
    RenderPass {
        /// Owning block.
        block: BlockId,
        /// Resolved input expressions, in the block's declared order.
        inputs: Vec<ExprId>,
    },
    /// Blends a freshly evaluated base value through a continuity target's
    /// history before writing the result to its slot.
    ContinuityApply {
        /// Stable identity of the continuity target this step maintains.
        target: TargetId,
        /// Expression producing this frame's base value.
        base: ExprId,
        /// Instance domain the base expression is keyed to, or `None` for a
        /// one-valued (non-field) continuity target.
        domain: Option<InstanceId>,
        /// Destination slot for the blended effective value.
        out_slot: SlotId,
        /// Policy applied each frame.
        policy: ContinuityPolicy,
        /// Decay rate per second, used by `Slew`/`Project`.
        decay_rate: f32,
        /// Crossfade window in seconds, used by `Crossfade`.
        crossfade_window_s: f32,
        /// Easing curve `Crossfade` maps elapsed/window through.
        easing: Easing,
        /// How a duplicate id in this target's identity vector is handled.
        duplicate_policy: DuplicatePolicy,
    },
}

impl Step {
    /// Which phase this step executes in.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::StateWrite { .. } | Self::FieldStateWrite { .. } => Phase::Commit,
            Self::EvalSignal { .. } | Self::Materialize { .. } | Self::Event { .. } | Self::RenderPass { .. } | Self::ContinuityApply { .. } => Phase::Evaluate,
        }
    }
}

/// The compiler's immutable output: a flat step schedule, the slot layout it
/// reads and writes, per-instance lane counts, and each instance domain's
/// stable per-lane identity vector (consumed by continuity lane mapping on
/// the next hot-swap).
#[derive(Clone, Default, Debug)]
pub struct CompiledProgram {
    /// Ordered schedule. Phase 1 steps and Phase 2 steps are interleaved in
    /// dependency order within each phase but the *phase* partition itself
    /// is total: every `Commit` step's inputs were computed by `Evaluate`
    /// steps from the same frame.
    pub steps: Vec<Step>,
    /// Hash-consed expression arena every step's `ExprId`s resolve against.
    pub exprs: ExprBuilder,
    /// Slot storage layout.
    pub slots: SlotTable,
    /// Current lane count for each instance domain.
    pub lane_counts: BTreeMap<InstanceId, u32>,
    /// Stable per-lane identity for each instance domain, used to build a
    /// `newToOld` mapping on the next hot-swap.
    pub identity_vectors: BTreeMap<InstanceId, Vec<TargetId>>,
}

impl CompiledProgram {
    /// Steps belonging to Phase 1 (evaluate), in schedule order.
    pub fn evaluate_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| matches!(s.phase(), Phase::Evaluate))
    }

    /// Steps belonging to Phase 2 (commit), in schedule order.
    pub fn commit_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| matches!(s.phase(), Phase::Commit))
    }

    /// A content-addressed fingerprint of this program's structure, used by
    /// the hot-swap driver to short-circuit a swap when a recompile produced
    /// a structurally-identical schedule.
    ///
    /// Covers step order and shape plus slot bank sizes; does not cover
    /// `identity_vectors` (those change every frame a field's domain
    /// resizes, independent of program structure).
    #[must_use]
    pub fn fingerprint(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(b"program:");
        hasher.update(&(self.steps.len() as u64).to_le_bytes());
        for step in &self.steps {
            hash_step(&mut hasher, step);
        }
        for kind in [SlotKind::F32, SlotKind::I32, SlotKind::U32, SlotKind::Shape2d] {
            hasher.update(&self.slots.bank_len(kind).to_le_bytes());
        }
        hasher.finalize().into()
    }
}

fn hash_step(hasher: &mut Hasher, step: &Step) {
    match step {
        Step::EvalSignal { expr, out_slot } => {
            hasher.update(b"eval");
            hasher.update(expr.as_bytes());
            hasher.update(&out_slot.0.to_le_bytes());
        }
        Step::Materialize { expr, domain, out_slot } => {
            hasher.update(b"materialize");
            hasher.update(expr.as_bytes());
            hasher.update(&domain.0.to_le_bytes());
            hasher.update(&out_slot.0.to_le_bytes());
        }
        Step::StateWrite { state, value } => {
            hasher.update(b"stateWrite");
            hasher.update(state.as_bytes());
            hasher.update(value.as_bytes());
        }
        Step::FieldStateWrite { state, domain, value } => {
            hasher.update(b"fieldStateWrite");
            hasher.update(state.as_bytes());
            hasher.update(&domain.0.to_le_bytes());
            hasher.update(value.as_bytes());
        }
        Step::Event { block, condition } => {
            hasher.update(b"event");
            hasher.update(&block.0.to_le_bytes());
            hasher.update(condition.as_bytes());
        }
        Step::RenderPass { block, inputs } => {
            hasher.update(b"renderPass");
            hasher.update(&block.0.to_le_bytes());
            hasher.update(&(inputs.len() as u64).to_le_bytes());
            for i in inputs {
                hasher.update(i.as_bytes());
            }
        }
        Step::ContinuityApply {
            target,
            base,
            domain,
            out_slot,
            policy,
            decay_rate,
            crossfade_window_s,
            easing,
            duplicate_policy,
        } => {
            hasher.update(b"continuityApply");
            hasher.update(target.as_bytes());
            hasher.update(base.as_bytes());
            hasher.update(&domain.map_or(u32::MAX, |d| d.0).to_le_bytes());
            hasher.update(&out_slot.0.to_le_bytes());
            hasher.update(&[*policy as u8]);
            hasher.update(&decay_rate.to_le_bytes());
            hasher.update(&crossfade_window_s.to_le_bytes());
            hasher.update(&[*easing as u8]);
            hasher.update(&[*duplicate_policy as u8]);
        }
    }
}

/// Per-instance-domain lane counts accumulated during compilation, before
/// being frozen into a `CompiledProgram`.
pub type LaneCounts = FxHashMap<InstanceId, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_offsets_are_contiguous_per_bank() {
        let mut table = SlotTable::new();
        let a = table.allocate(SlotKind::F32, 1);
        let b = table.allocate(SlotKind::F32, 4);
        let c = table.allocate(SlotKind::I32, 1);
        assert_eq!(table.layout(a).unwrap().offset, 0);
        assert_eq!(table.layout(b).unwrap().offset, 1);
        assert_eq!(table.layout(c).unwrap().offset, 0);
        assert_eq!(table.bank_len(SlotKind::F32), 5);
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_sensitive() {
        let slot = SlotTable::new();
        let p1 = CompiledProgram {
            steps: vec![Step::EvalSignal {
                expr: ExprId([1; 32]),
                out_slot: SlotId(0),
            }],
            exprs: ExprBuilder::new(),
            slots: slot.clone(),
            lane_counts: BTreeMap::new(),
            identity_vectors: BTreeMap::new(),
        };
        let p2 = CompiledProgram {
            steps: vec![Step::EvalSignal {
                expr: ExprId([2; 32]),
                out_slot: SlotId(0),
            }],
            exprs: ExprBuilder::new(),
            slots: slot,
            lane_counts: BTreeMap::new(),
            identity_vectors: BTreeMap::new(),
        };
        assert_eq!(p1.fingerprint(), p1.fingerprint());
        assert_ne!(p1.fingerprint(), p2.fingerprint());
    }

    #[test]
    fn phase_partition_is_total() {
        let steps = vec![
            Step::EvalSignal {
                expr: ExprId([0; 32]),
                out_slot: SlotId(0),
            },
            Step::StateWrite {
                state: StateId([0; 32]),
                value: ExprId([0; 32]),
            },
        ];
        let program = CompiledProgram {
            steps,
            exprs: ExprBuilder::new(),
            slots: SlotTable::new(),
            lane_counts: BTreeMap::new(),
            identity_vectors: BTreeMap::new(),
        };
        assert_eq!(program.evaluate_steps().count(), 1);
        assert_eq!(program.commit_steps().count(), 1);
    }
}
