//! Two-phase per-frame executor: walks a
//! [`CompiledProgram`]'s flat schedule, Phase 1 (evaluate) before Phase 2
//! (commit), reading state writes from the *previous* tick only.
//!
//! Steps run in a fixed, already-validated order; the executor never
//! re-derives dependencies at tick time. One state struct is mutated in
//! place across a tick, not rebuilt per step.

pub mod banks;

use rustc_hash::FxHashMap;

use crate::continuity::{self, ContinuityParams, ContinuityPolicy, ContinuityStore, DuplicatePolicy};
use crate::diagnostics::{Diagnostic, DiagnosticHub, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::eval::Easing;
use crate::ident::{BlockId, ExprId, InstanceId, SlotId, StateId, TargetId};
use crate::ir::{ConstValue, ExprData, FieldExpr, FieldIntrinsic, ValueExpr};
use crate::materializer::{BufferPool, FieldCache};
use crate::program::{CompiledProgram, SlotKind, Step};
use crate::telemetry::TelemetrySink;

use banks::StorageBanks;

/// Fatal per-tick error: distinct from a [`crate::diagnostics::Diagnostic`],
/// which is a recoverable finding. A `RuntimeError` means the executor
/// refused to run this tick at all.
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The host-provided model clock did not strictly advance past the
    /// previous tick's frame stamp.
    #[error("frame stamp must advance monotonically: got {got}, previous was {previous}")]
    NonMonotoneTime {
        /// The value passed to this tick.
        got: u64,
        /// The previous tick's frame stamp.
        previous: u64,
    },
    /// A schedule step references a slot or expression id absent from the
    /// compiled program it was run against.
    #[error("schedule step references an id absent from the compiled program")]
    ScheduleDependencyMissing,
}

#[derive(Default)]
struct TickCounters {
    cache_hits: u64,
    cache_evictions: u64,
}

/// Double-buffered state store: `current` is what Phase 1 reads this tick,
/// `pending` accumulates Phase 2 writes, and `advance` swaps them once the
/// whole tick has run: a stateful block reads its previous
/// frame's committed state.
#[derive(Clone, Default, Debug)]
pub struct StateStore {
    current: FxHashMap<StateId, Vec<f32>>,
    pending: FxHashMap<StateId, Vec<f32>>,
}

impl StateStore {
    /// Creates an empty store (every `StateRead` returns all-zero until its
    /// first commit).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The previous tick's committed value for `state`, or `&[]` if it has
    /// never been written.
    #[must_use]
    pub fn read(&self, state: StateId) -> &[f32] {
        self.current.get(&state).map_or(&[][..], Vec::as_slice)
    }

    /// Buffers a new value for `state`, visible only after [`Self::advance`].
    pub fn write(&mut self, state: StateId, value: Vec<f32>) {
        self.pending.insert(state, value);
    }

    /// Publishes this tick's buffered writes, making them visible to the
    /// next tick's Phase 1.
    pub fn advance(&mut self) {
        for (state, value) in self.pending.drain() {
            self.current.insert(state, value);
        }
    }

    /// Sets `state`'s current value directly, bypassing the write/advance
    /// pipeline. Used only to seed a freshly built store with migrated
    /// values before its runtime's first tick.
    pub(crate) fn seed(&mut self, state: StateId, value: Vec<f32>) {
        self.current.insert(state, value);
    }
}

/// Discrete events that fired this tick, recorded for this
/// frame only and discarded at the start of every tick.
#[derive(Clone, Default, Debug)]
pub struct FiredEvents {
    blocks: Vec<BlockId>,
}

impl FiredEvents {
    /// `true` if `block`'s event condition evaluated truthy this tick.
    #[must_use]
    pub fn fired(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// One collected render pass's resolved input values, ready for the render
/// assembler.
#[derive(Clone, Debug)]
pub struct CollectedRenderPass {
    /// Owning block.
    pub block: BlockId,
    /// Each declared input's evaluated components, in declaration order.
    pub inputs: Vec<Vec<f32>>,
}

/// What one tick produced beyond its mutated banks/state: which events
/// fired and which render passes were collected, in schedule order.
#[derive(Clone, Default, Debug)]
pub struct TickOutput {
    /// Events that fired this tick.
    pub events: FiredEvents,
    /// Render passes collected this tick, in schedule order.
    pub render_passes: Vec<CollectedRenderPass>,
}

/// Owns every piece of state that persists across ticks: the live storage
/// banks, the stateful-block store, the field cache, and the buffer pool
/// that backs it.
///
/// A `RuntimeState` is tied to one `CompiledProgram`'s slot shape; swapping
/// programs (see [`crate::hotswap`]) builds a new one and migrates
/// state into it rather than mutating this one's banks in place.
pub struct RuntimeState {
    banks: StorageBanks,
    state: StateStore,
    field_cache: FieldCache,
    buffer_pool: BufferPool,
    continuity: ContinuityStore,
    diagnostics: DiagnosticHub,
    frame_stamp: u64,
    ticked: bool,
    dt_s: f32,
}

/// Diagnostic hub capacity for a fresh [`RuntimeState`]: retains the most
/// recent continuity/runtime findings across frames and hot swaps.
const DIAGNOSTIC_HUB_CAPACITY: usize = 64;

/// What a [`RuntimeState::migrate`] call did with each surviving `StateId`,
/// reported by the hot-swap driver alongside `ProgramSwapped`.
#[derive(Clone, Copy, Default, Debug)]
pub struct MigrationOutcome {
    /// States whose shape was unchanged and were copied verbatim.
    pub direct_copied: u32,
    /// States migrated lane-wise via the lane-mapping service.
    pub migrated: u32,
    /// States with no old counterpart, left at their declared initial value.
    pub initialized: u32,
    /// States present in the old program but absent from the new one.
    pub discarded: u32,
}

impl RuntimeState {
    /// Creates a fresh runtime for `program`: zero-filled banks, no
    /// stateful-block history, an empty field cache, frame stamp `0`.
    #[must_use]
    pub fn new(program: &CompiledProgram) -> Self {
        Self {
            banks: StorageBanks::sized_for(&program.slots),
            state: StateStore::new(),
            field_cache: FieldCache::new(),
            buffer_pool: BufferPool::new(),
            continuity: ContinuityStore::new(),
            diagnostics: DiagnosticHub::new(DIAGNOSTIC_HUB_CAPACITY),
            frame_stamp: 0,
            ticked: false,
            dt_s: 0.0,
        }
    }

    /// Runtime-emitted diagnostics accumulated across this runtime's ticks
    /// and the hot swap that produced it, most recent within the ring cap.
    #[must_use]
    pub const fn diagnostics(&self) -> &DiagnosticHub {
        &self.diagnostics
    }

    /// The live storage banks, as left by the most recent tick.
    #[must_use]
    pub const fn banks(&self) -> &StorageBanks {
        &self.banks
    }

    /// The stateful-block store, as left by the most recent tick.
    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    /// Monotone, non-wrapping frame stamp: the host-provided model clock
    /// value from the most recent tick.
    #[must_use]
    pub const fn frame_stamp(&self) -> u64 {
        self.frame_stamp
    }

    /// Runs one full tick of `program` against this runtime: every Phase 1
    /// step, then every Phase 2 step, then advances the state store so the
    /// next tick's Phase 1 sees this tick's writes.
    ///
    /// `t_model_ms` is the host-provided model clock for this frame; it must
    /// be strictly greater than the value passed to the previous tick.
    ///
    /// # Errors
    /// Returns [`RuntimeError::NonMonotoneTime`] if `t_model_ms` does not
    /// strictly advance past the previous tick's frame stamp, or
    /// [`RuntimeError::ScheduleDependencyMissing`] if a schedule step
    /// references an id `program` doesn't resolve.
    pub fn tick(&mut self, program: &CompiledProgram, t_model_ms: u64) -> Result<TickOutput, RuntimeError> {
        self.tick_with_telemetry(program, t_model_ms, &crate::telemetry::NullTelemetrySink)
    }

    /// Same as [`Self::tick`], reporting a `FrameTick` event to `sink` once
    /// the tick has fully committed.
    ///
    /// # Errors
    /// See [`Self::tick`].
    pub fn tick_with_telemetry(&mut self, program: &CompiledProgram, t_model_ms: u64, sink: &dyn TelemetrySink) -> Result<TickOutput, RuntimeError> {
        if self.ticked && t_model_ms <= self.frame_stamp {
            return Err(RuntimeError::NonMonotoneTime { got: t_model_ms, previous: self.frame_stamp });
        }
        check_schedule_dependencies(program)?;

        self.dt_s = if self.ticked { (t_model_ms - self.frame_stamp) as f32 / 1000.0 } else { 0.0 };
        self.frame_stamp = t_model_ms;
        self.ticked = true;

        let mut events = FiredEvents::default();
        let mut render_passes = Vec::new();
        let mut counters = TickCounters::default();
        let mut steps_executed = 0usize;

        for step in program.evaluate_steps() {
            self.run_evaluate_step(program, step, &mut events, &mut render_passes, &mut counters);
            steps_executed += 1;
        }
        for step in program.commit_steps() {
            self.run_commit_step(program, step);
            steps_executed += 1;
        }

        self.state.advance();
        sink.frame_tick(self.frame_stamp, steps_executed, counters.cache_hits, counters.cache_evictions);

        Ok(TickOutput { events, render_passes })
    }

    /// Builds a runtime for `new_program`, migrating `old`'s stateful-block
    /// history and continuity history across the swap.
    ///
    /// Continuity state carries over wholesale (its `TargetId`s are stable
    /// across a recompile by construction); every `StateId` surviving into
    /// `new_program` is direct-copied if its domain's shape didn't change,
    /// migrated lane-wise via the lane-mapping service if it did, or left at
    /// its declared initial value if it has no old counterpart.
    ///
    /// `duplicate_policy` governs how a duplicate id in an identity vector
    /// is handled during a lane-wise migration: `Strict` resets the affected
    /// state to unmapped lanes and records a `DuplicateIdentity` diagnostic
    /// on the returned runtime, `Lenient` degrades to `byIndex` and records
    /// the same diagnostic anyway.
    #[must_use]
    pub fn migrate(new_program: &CompiledProgram, old_program: &CompiledProgram, old: &Self, duplicate_policy: DuplicatePolicy) -> (Self, MigrationOutcome) {
        let mut next = Self::new(new_program);
        next.continuity.clone_from(&old.continuity);

        let old_domains = state_domains(old_program);
        let new_domains = state_domains(new_program);
        let mut outcome = MigrationOutcome::default();
        let mut diagnostics = DiagnosticSink::new();

        for (&sid, &new_domain) in &new_domains {
            let Some(&old_domain) = old_domains.get(&sid) else {
                outcome.initialized += 1;
                continue;
            };
            let old_value = old.state.read(sid);
            if old_value.is_empty() {
                outcome.initialized += 1;
                continue;
            }
            let same_shape = match (old_domain, new_domain) {
                (None, None) => true,
                (Some(od), Some(nd)) => od == nd && old_program.lane_counts.get(&od) == new_program.lane_counts.get(&nd),
                _ => false,
            };
            if same_shape {
                next.state.seed(sid, old_value.to_vec());
                outcome.direct_copied += 1;
            } else if let (Some(od), Some(nd)) = (old_domain, new_domain) {
                let old_identity = old_program.identity_vectors.get(&od).cloned().unwrap_or_default();
                let new_identity = new_program.identity_vectors.get(&nd).cloned().unwrap_or_default();
                let mapping = continuity::build_lane_mapping(&old_identity, &new_identity, continuity::IdentityMode::ById, duplicate_policy);
                if mapping.duplicate_detected {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::DuplicateIdentity,
                        Severity::Warn,
                        TargetRef::Patch,
                        "hot-swap migration found a duplicate id in a state's identity vector",
                    ));
                }
                let stride = if old_identity.is_empty() { 0 } else { old_value.len() / old_identity.len() };
                next.state.seed(sid, migrate_stridewise(old_value, &mapping.new_to_old, stride));
                outcome.migrated += 1;
            } else {
                outcome.initialized += 1;
            }
        }

        next.diagnostics.extend_from_sink(&mut diagnostics);
        outcome.discarded = u32::try_from(old_domains.keys().filter(|k| !new_domains.contains_key(k)).count()).unwrap_or(u32::MAX);
        (next, outcome)
    }

    fn run_evaluate_step(&mut self, program: &CompiledProgram, step: &Step, events: &mut FiredEvents, render_passes: &mut Vec<CollectedRenderPass>, counters: &mut TickCounters) {
        match step {
            Step::EvalSignal { expr, out_slot } => {
                let value = eval_value(program, *expr, &self.banks, &self.state);
                write_slot(program, &mut self.banks, *out_slot, &value);
            }
            Step::Materialize { expr, domain, out_slot } => {
                self.materialize_field(program, *expr, *domain, *out_slot, counters);
            }
            Step::Event { block, condition } => {
                let value = eval_value(program, *condition, &self.banks, &self.state);
                if value.first().copied().unwrap_or(0.0) != 0.0 {
                    events.blocks.push(*block);
                }
            }
            Step::RenderPass { block, inputs } => {
                let resolved = inputs.iter().map(|&id| eval_value(program, id, &self.banks, &self.state)).collect();
                render_passes.push(CollectedRenderPass { block: *block, inputs: resolved });
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
                self.run_continuity_apply(program, *target, *base, *domain, *out_slot, *policy, *decay_rate, *crossfade_window_s, *easing, *duplicate_policy);
            }
            Step::StateWrite { .. } | Step::FieldStateWrite { .. } => {
                debug_assert!(false, "commit-phase step reached the evaluate loop");
            }
        }
    }

    /// Runs one `continuity-apply` step: evaluates this frame's
    /// base value, diffs the target's identity vector against last frame's
    /// to detect a domain change, then blends through the target's history
    /// according to `policy` before writing the effective value to its slot.
    fn run_continuity_apply(
        &mut self,
        program: &CompiledProgram,
        target: TargetId,
        base_expr: ExprId,
        domain: Option<InstanceId>,
        out_slot: SlotId,
        policy: ContinuityPolicy,
        decay_rate: f32,
        crossfade_window_s: f32,
        easing: Easing,
        duplicate_policy: DuplicatePolicy,
    ) {
        let (base, identity, stride) = match domain {
            Some(d) => {
                let identity = program.identity_vectors.get(&d).cloned().unwrap_or_default();
                let stride = field_output_stride(program, base_expr);
                let base = eval_field_all_lanes(program, base_expr, d, &self.banks, &self.state);
                (base, identity, stride)
            }
            None => {
                let value = eval_value(program, base_expr, &self.banks, &self.state);
                let stride = value.len().max(1);
                (value, vec![target], stride)
            }
        };

        let state = self.continuity.entry(target).or_default();
        let domain_change = state.domain_changed(&identity);
        let params = ContinuityParams {
            policy,
            decay_rate,
            crossfade_window_s,
            easing,
            dt_s: self.dt_s,
            duplicate_policy,
        };
        let mut diagnostics = DiagnosticSink::new();
        let effective = continuity::apply(state, target, &base, &identity, stride, domain_change, params, &mut diagnostics);
        self.diagnostics.extend_from_sink(&mut diagnostics);
        write_slot(program, &mut self.banks, out_slot, &effective);
    }

    fn run_commit_step(&mut self, program: &CompiledProgram, step: &Step) {
        match step {
            Step::StateWrite { state: id, value } => {
                let resolved = eval_value(program, *value, &self.banks, &self.state);
                self.state.write(*id, resolved);
            }
            Step::FieldStateWrite { state: id, domain, value } => {
                let resolved = eval_field_all_lanes(program, *value, *domain, &self.banks, &self.state);
                self.state.write(*id, resolved);
            }
            _ => {
                debug_assert!(false, "evaluate-phase step reached the commit loop");
            }
        }
    }

    /// Materializes one `materialize` step, consulting the field cache
    /// before recomputing. A cache hit at this tick's frame
    /// stamp skips every per-lane kernel call entirely; a miss computes into
    /// a pool-acquired buffer, writes it into the slot, then hands the
    /// buffer to the cache for reuse by any other step sharing this `ExprId`
    /// this frame.
    fn materialize_field(&mut self, program: &CompiledProgram, expr: ExprId, domain: InstanceId, out_slot: SlotId, counters: &mut TickCounters) {
        let Some(layout) = program.slots.layout(out_slot) else { return };
        let frame_stamp = self.frame_stamp;

        if let Some(cached) = self.field_cache.get(expr, frame_stamp) {
            let base = layout.offset as usize;
            let kind = layout.kind;
            for (i, &v) in cached.iter().enumerate() {
                write_bank_cell(&mut self.banks, kind, base + i, v);
            }
            counters.cache_hits += 1;
            return;
        }

        let lane_count = program.lane_counts.get(&domain).copied().unwrap_or(0);
        let stride = field_output_stride(program, expr);
        let total_len = lane_count as usize * stride;
        let mut buf = self.buffer_pool.acquire(total_len);
        for lane in 0..lane_count {
            let lane_values = eval_field_lane(program, expr, lane, lane_count, &self.banks, &self.state);
            let base = lane as usize * stride;
            for (i, v) in lane_values.into_iter().enumerate() {
                if let Some(cell) = buf.get_mut(base + i) {
                    *cell = v;
                }
            }
        }

        let bank_base = layout.offset as usize;
        let kind = layout.kind;
        for (i, &v) in buf.iter().enumerate() {
            write_bank_cell(&mut self.banks, kind, bank_base + i, v);
        }
        counters.cache_evictions += self.field_cache.insert(expr, frame_stamp, buf, &mut self.buffer_pool) as u64;
    }
}

/// Verifies every step's referenced expression and slot ids resolve against
/// `program` before the tick runs a single step, so a malformed or
/// mismatched program is rejected atomically rather than partially executed.
fn check_schedule_dependencies(program: &CompiledProgram) -> Result<(), RuntimeError> {
    let missing = RuntimeError::ScheduleDependencyMissing;
    for step in &program.steps {
        let ok = match step {
            Step::EvalSignal { expr, out_slot } => program.exprs.get(*expr).is_some() && program.slots.layout(*out_slot).is_some(),
            Step::Materialize { expr, out_slot, .. } => program.exprs.get(*expr).is_some() && program.slots.layout(*out_slot).is_some(),
            Step::StateWrite { value, .. } | Step::FieldStateWrite { value, .. } => program.exprs.get(*value).is_some(),
            Step::Event { condition, .. } => program.exprs.get(*condition).is_some(),
            Step::RenderPass { inputs, .. } => inputs.iter().all(|&id| program.exprs.get(id).is_some()),
            Step::ContinuityApply { base, out_slot, .. } => program.exprs.get(*base).is_some() && program.slots.layout(*out_slot).is_some(),
        };
        if !ok {
            return Err(missing);
        }
    }
    Ok(())
}

/// Every `StateId` a program's schedule writes to, paired with the instance
/// domain it's keyed to (`None` for a scalar `StateWrite`).
fn state_domains(program: &CompiledProgram) -> FxHashMap<StateId, Option<InstanceId>> {
    program
        .steps
        .iter()
        .filter_map(|step| match step {
            Step::StateWrite { state, .. } => Some((*state, None)),
            Step::FieldStateWrite { state, domain, .. } => Some((*state, Some(*domain))),
            _ => None,
        })
        .collect()
}

/// Rebuilds a `stride`-wide buffer for `new_to_old.len()` lanes, copying
/// lane `k`'s components from `old[new_to_old[k]]` when mapped, leaving
/// unmapped lanes at their default (zero).
fn migrate_stridewise(old: &[f32], new_to_old: &[i32], stride: usize) -> Vec<f32> {
    if stride == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0; new_to_old.len() * stride];
    for (k, &old_lane) in new_to_old.iter().enumerate() {
        if old_lane < 0 {
            continue;
        }
        let old_base = old_lane as usize * stride;
        let new_base = k * stride;
        for c in 0..stride {
            out[new_base + c] = old.get(old_base + c).copied().unwrap_or(0.0);
        }
    }
    out
}

fn write_slot(program: &CompiledProgram, banks: &mut StorageBanks, slot: SlotId, value: &[f32]) {
    let Some(layout) = program.slots.layout(slot) else { return };
    let base = layout.offset as usize;
    for (i, &v) in value.iter().enumerate().take(layout.count as usize) {
        write_bank_cell(banks, layout.kind, base + i, v);
    }
}

fn write_bank_cell(banks: &mut StorageBanks, kind: SlotKind, index: usize, value: f32) {
    match kind {
        SlotKind::F32 => {
            if let Some(cell) = banks.f32_bank.get_mut(index) {
                *cell = value;
            }
        }
        SlotKind::I32 => {
            if let Some(cell) = banks.i32_bank.get_mut(index) {
                *cell = value as i32;
            }
        }
        SlotKind::U32 => {
            if let Some(cell) = banks.u32_bank.get_mut(index) {
                *cell = u32::from(value != 0.0);
            }
        }
        SlotKind::Shape2d => {}
    }
}

fn read_slot(program: &CompiledProgram, banks: &StorageBanks, slot: SlotId) -> Vec<f32> {
    let Some(layout) = program.slots.layout(slot) else { return vec![0.0] };
    let base = layout.offset as usize;
    (0..layout.count as usize)
        .map(|i| match layout.kind {
            SlotKind::F32 => banks.f32_bank.get(base + i).copied().unwrap_or(0.0),
            SlotKind::I32 => banks.i32_bank.get(base + i).copied().unwrap_or(0) as f32,
            SlotKind::U32 => banks.u32_bank.get(base + i).copied().unwrap_or(0) as f32,
            SlotKind::Shape2d => 0.0,
        })
        .collect()
}

/// Evaluates a `ValueExpr` tree rooted at `id`, returning its components (1
/// for scalars, up to 4 for `Color`). `Construct`/`Extract` are the only
/// nodes that build or decompose a multi-component value; every other node
/// yields exactly one component, except `SlotRead`, which reads as many
/// contiguous lanes as its slot was allocated with.
fn eval_value(program: &CompiledProgram, id: ExprId, banks: &StorageBanks, state: &StateStore) -> Vec<f32> {
    let Some(data) = program.exprs.get(id) else { return vec![0.0] };
    let Some(expr) = data.as_value() else { return vec![0.0] };
    match expr {
        ValueExpr::Const(c) => vec![const_to_f32(*c)],
        ValueExpr::SlotRead(slot) => read_slot(program, banks, *slot),
        ValueExpr::StateRead(sid) => {
            let v = state.read(*sid);
            if v.is_empty() {
                vec![0.0]
            } else {
                v.to_vec()
            }
        }
        ValueExpr::Opcode(op, operands) => {
            let args: Vec<f32> = operands.iter().map(|&o| first_component(program, o, banks, state)).collect();
            vec![op.apply(&args)]
        }
        ValueExpr::Construct(_, components) => components.iter().map(|&c| first_component(program, c, banks, state)).collect(),
        ValueExpr::Extract(inner, index) => {
            let v = eval_value(program, *inner, banks, state);
            vec![v.get(*index as usize).copied().unwrap_or(0.0)]
        }
        ValueExpr::ShapeRef { .. } => Vec::new(),
    }
}

fn first_component(program: &CompiledProgram, id: ExprId, banks: &StorageBanks, state: &StateStore) -> f32 {
    eval_value(program, id, banks, state).first().copied().unwrap_or(0.0)
}

fn const_to_f32(c: ConstValue) -> f32 {
    match c {
        ConstValue::Float(f) => f,
        ConstValue::Int(i) => i as f32,
        ConstValue::Bool(b) => f32::from(u8::from(b)),
    }
}

fn eval_field_all_lanes(program: &CompiledProgram, expr: ExprId, domain: InstanceId, banks: &StorageBanks, state: &StateStore) -> Vec<f32> {
    let lane_count = program.lane_counts.get(&domain).copied().unwrap_or(0);
    (0..lane_count).flat_map(|lane| eval_field_lane(program, expr, lane, lane_count, banks, state)).collect()
}

fn field_output_stride(program: &CompiledProgram, expr: ExprId) -> usize {
    match program.exprs.get(expr).and_then(ExprData::as_field) {
        Some(FieldExpr::Kernel(kernel, _)) => kernel.output_stride(),
        _ => 1,
    }
}

/// Evaluates one lane of a `FieldExpr`/`ValueExpr` tree. A plain value node
/// encountered here is the broadcast case: it doesn't depend on `lane`, so
/// it's evaluated once and used as-is.
fn eval_field_lane(program: &CompiledProgram, id: ExprId, lane: u32, lane_count: u32, banks: &StorageBanks, state: &StateStore) -> Vec<f32> {
    let Some(data) = program.exprs.get(id) else { return vec![0.0] };
    match data.as_field() {
        Some(FieldExpr::Intrinsic(intrinsic)) => vec![eval_intrinsic(*intrinsic, lane, lane_count)],
        Some(FieldExpr::Broadcast(value)) => eval_value(program, *value, banks, state),
        Some(FieldExpr::Kernel(kernel, operands)) => {
            let gathered: Vec<f32> = operands.iter().flat_map(|&o| eval_field_lane(program, o, lane, lane_count, banks, state)).collect();
            let mut out = vec![0.0; kernel.output_stride()];
            kernel.apply_lane(lane, lane_count, &gathered, &mut out);
            out
        }
        None => eval_value(program, id, banks, state),
    }
}

fn eval_intrinsic(intrinsic: FieldIntrinsic, lane: u32, lane_count: u32) -> f32 {
    match intrinsic {
        FieldIntrinsic::Index => lane as f32,
        FieldIntrinsic::NormalizedIndex => {
            if lane_count <= 1 {
                0.0
            } else {
                lane as f32 / (lane_count - 1) as f32
            }
        }
        FieldIntrinsic::RandomId => crate::eval::noise1d(lane as f32, 0).mul_add(0.5, 0.5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Opcode;
    use crate::ident::make_state_id;
    use crate::ir::ExprBuilder;
    use crate::program::{LaneCounts, SlotTable};
    use crate::types::{CanonicalType, Extent, PayloadKind, Unit};

    fn scalar_ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One)
    }

    #[test]
    fn eval_signal_writes_constant_into_its_slot() {
        let mut exprs = ExprBuilder::new();
        let mut slots = SlotTable::new();
        let c = exprs.const_value(ConstValue::Float(3.5), scalar_ty());
        let slot = slots.allocate(SlotKind::F32, 1);
        let program = CompiledProgram {
            steps: vec![Step::EvalSignal { expr: c, out_slot: slot }],
            exprs,
            slots,
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        runtime.tick(&program, 16).expect("first tick always succeeds");
        assert_eq!(runtime.banks().f32_bank[0], 3.5);
    }

    #[test]
    fn state_write_is_invisible_until_next_tick() {
        let mut exprs = ExprBuilder::new();
        let one = exprs.const_value(ConstValue::Float(1.0), scalar_ty());
        let sid = make_state_id("counter");
        let prev = exprs.state_read(sid, scalar_ty());
        let next = exprs.opcode(Opcode::Add, vec![prev, one], scalar_ty());
        let mut slots = SlotTable::new();
        let slot = slots.allocate(SlotKind::F32, 1);
        let program = CompiledProgram {
            steps: vec![
                Step::EvalSignal { expr: prev, out_slot: slot },
                Step::StateWrite { state: sid, value: next },
            ],
            exprs,
            slots,
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        runtime.tick(&program, 16).expect("first tick always succeeds");
        assert_eq!(runtime.banks().f32_bank[0], 0.0);
        runtime.tick(&program, 32).expect("second tick advances monotonically");
        assert_eq!(runtime.banks().f32_bank[0], 1.0);
    }

    #[test]
    fn materialize_writes_index_per_lane_and_reuses_cache() {
        let mut exprs = ExprBuilder::new();
        let domain = InstanceId(0);
        let ty = CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::Many(domain));
        let field = exprs.field_intrinsic(FieldIntrinsic::Index, ty);
        let mut slots = SlotTable::new();
        let slot = slots.allocate(SlotKind::F32, 4);
        let mut lane_counts: LaneCounts = Default::default();
        lane_counts.insert(domain, 4);
        let program = CompiledProgram {
            steps: vec![Step::Materialize { expr: field, domain, out_slot: slot }],
            exprs,
            slots,
            lane_counts: lane_counts.into_iter().collect(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        runtime.tick(&program, 16).expect("first tick always succeeds");
        assert_eq!(runtime.banks().f32_bank, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(runtime.field_cache.len(), 1);
    }

    #[test]
    fn event_fires_only_when_condition_is_nonzero() {
        let mut exprs = ExprBuilder::new();
        let truthy = exprs.const_value(ConstValue::Bool(true), CanonicalType::concrete(PayloadKind::Bool, Unit::Scalar, Extent::One));
        let block = BlockId(7);
        let program = CompiledProgram {
            steps: vec![Step::Event { block, condition: truthy }],
            exprs,
            slots: SlotTable::new(),
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        let out = runtime.tick(&program, 16).expect("first tick always succeeds");
        assert!(out.events.fired(block));
    }

    #[test]
    fn continuity_apply_preserves_lane_by_id_across_domain_change() {
        let mut exprs = ExprBuilder::new();
        let base = exprs.const_value(ConstValue::Float(0.0), scalar_ty());
        let target = crate::ident::make_target_id("dot");
        let mut slots = SlotTable::new();
        let slot = slots.allocate(SlotKind::F32, 1);
        let program = CompiledProgram {
            steps: vec![Step::ContinuityApply {
                target,
                base,
                domain: None,
                out_slot: slot,
                policy: ContinuityPolicy::Slew,
                decay_rate: 1.0,
                crossfade_window_s: 0.0,
                easing: Easing::Linear,
                duplicate_policy: DuplicatePolicy::Lenient,
            }],
            exprs,
            slots,
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        runtime.tick(&program, 16).expect("first tick always succeeds");
        assert_eq!(runtime.banks().f32_bank[0], 0.0);
        assert_eq!(runtime.continuity.len(), 1);
    }

    #[test]
    fn tick_rejects_non_monotone_frame_stamp() {
        let program = CompiledProgram::default();
        let mut runtime = RuntimeState::new(&program);
        runtime.tick(&program, 16).expect("first tick always succeeds");
        let err = runtime.tick(&program, 16).expect_err("repeated frame stamp must be rejected");
        assert!(matches!(err, RuntimeError::NonMonotoneTime { got: 16, previous: 16 }));
    }

    #[test]
    fn tick_rejects_a_step_referencing_a_missing_expr() {
        let mut slots = SlotTable::new();
        let slot = slots.allocate(SlotKind::F32, 1);
        let program = CompiledProgram {
            steps: vec![Step::EvalSignal { expr: ExprId([1; 32]), out_slot: slot }],
            exprs: ExprBuilder::new(),
            slots,
            lane_counts: Default::default(),
            identity_vectors: Default::default(),
        };
        let mut runtime = RuntimeState::new(&program);
        let err = runtime.tick(&program, 16).expect_err("dangling expr id must be rejected");
        assert!(matches!(err, RuntimeError::ScheduleDependencyMissing));
    }
}
