//! Block-lowering context: the intrinsics a [`crate::registry::LowerFn`] uses
//! to emit IR expressions, allocate slots, and append schedule steps.
//!
//! One `LowerCtx` is threaded through an entire compilation; every block's
//! `lower` hook borrows it mutably in turn. This keeps the hash-consing
//! arena, the slot table, and the emerging schedule each singular and
//! shared, rather than giving each block its own copy.

use std::collections::BTreeMap;

use crate::diagnostics::DiagnosticSink;
use crate::eval::{FieldKernel, Opcode};
use crate::ident::{make_target_id, ExprId, InstanceId, SlotId, StateId, Symbol, SymbolTable, TargetId};
use crate::ir::{ConstValue, ExprBuilder, FieldIntrinsic};
use crate::patch::graph::Patch;
use crate::program::{LaneCounts, SlotKind, SlotTable, Step};
use crate::registry::{BlockRegistry, LowerError};
use crate::types::{CanonicalType, Extent, PayloadKind};

use super::cycles::DependencyOrder;
use super::CompileError;

/// Mutable working state shared by every block's lowering call within one
/// compilation.
pub struct LowerCtx<'a> {
    /// Hash-consed expression arena.
    pub exprs: &'a mut ExprBuilder,
    /// Slot storage layout under construction.
    pub slots: &'a mut SlotTable,
    /// Schedule steps emitted so far, in emission order (pass 9 re-sorts
    /// this into final dependency order; lowering only needs to append).
    pub steps: &'a mut Vec<Step>,
    /// Diagnostics sink for non-fatal lowering findings (e.g.
    /// `DiagnosticKind::AdapterInserted`).
    pub diagnostics: &'a mut DiagnosticSink,
    /// Shared symbol interner.
    pub symbols: &'a mut SymbolTable,
}

impl<'a> LowerCtx<'a> {
    /// Interns a string as a `Symbol`.
    pub fn intern(&mut self, s: &str) -> Symbol {
        self.symbols.intern(s)
    }

    /// `const(value)`.
    pub fn const_value(&mut self, value: ConstValue, ty: CanonicalType) -> ExprId {
        self.exprs.const_value(value, ty)
    }

    /// `slotRead(slot)`.
    pub fn slot_read(&mut self, slot: SlotId, ty: CanonicalType) -> ExprId {
        self.exprs.slot_read(slot, ty)
    }

    /// `stateRead(state)`: reads the *previous* frame's committed value.
    pub fn state_read(&mut self, state: StateId, ty: CanonicalType) -> ExprId {
        self.exprs.state_read(state, ty)
    }

    /// `opcode(op, operands)`. Validates arity before interning, turning a
    /// malformed lowering call into a deterministic build-time error rather
    /// than a later evaluation-time panic.
    pub fn opcode(&mut self, op: Opcode, operands: Vec<ExprId>, ty: CanonicalType) -> Result<ExprId, crate::eval::ArityError> {
        op.check_arity(operands.len())?;
        Ok(self.exprs.opcode(op, operands, ty))
    }

    /// `kernelMap(kernel, operands)`.
    pub fn kernel_map(&mut self, kernel: FieldKernel, operands: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.exprs.kernel_map(kernel, operands, ty)
    }

    /// `kernelZip(kernel, operands)`.
    pub fn kernel_zip(&mut self, kernel: FieldKernel, operands: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.exprs.kernel_zip(kernel, operands, ty)
    }

    /// `broadcast(value)`: replicate a one-valued expression to every lane.
    pub fn broadcast(&mut self, value: ExprId, ty: CanonicalType) -> ExprId {
        self.exprs.broadcast(value, ty)
    }

    /// `construct(payload, components)`.
    pub fn construct(&mut self, payload: PayloadKind, components: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.exprs.construct(payload, components, ty)
    }

    /// `extract(expr, index)`.
    pub fn extract(&mut self, expr: ExprId, index: u8, ty: CanonicalType) -> ExprId {
        self.exprs.extract(expr, index, ty)
    }

    /// A field intrinsic (`index`, `normalizedIndex`, `randomId`).
    pub fn field_intrinsic(&mut self, intrinsic: FieldIntrinsic, ty: CanonicalType) -> ExprId {
        self.exprs.field_intrinsic(intrinsic, ty)
    }

    /// `allocValueSlot(kind, laneCount)`: reserves storage for a signal
    /// (`laneCount == 1`) or a materialized field (`laneCount == N`).
    pub fn alloc_value_slot(&mut self, kind: SlotKind, lane_count: u32) -> SlotId {
        self.slots.allocate(kind, lane_count)
    }

    /// `allocShape2DSlot()`: reserves one packed topology record.
    pub fn alloc_shape2d_slot(&mut self) -> SlotId {
        self.slots.allocate(SlotKind::Shape2d, 1)
    }

    /// `stepEvalSig(expr, outSlot)`.
    pub fn step_eval_sig(&mut self, expr: ExprId, out_slot: SlotId) {
        self.steps.push(Step::EvalSignal { expr, out_slot });
    }

    /// `stepMaterialize(expr, domain, outSlot)`.
    pub fn step_materialize(&mut self, expr: ExprId, domain: InstanceId, out_slot: SlotId) {
        self.steps.push(Step::Materialize { expr, domain, out_slot });
    }

    /// `stepStateWrite(state, value)`.
    pub fn step_state_write(&mut self, state: StateId, value: ExprId) {
        self.steps.push(Step::StateWrite { state, value });
    }

    /// `stepFieldStateWrite(state, domain, value)`.
    pub fn step_field_state_write(&mut self, state: StateId, domain: InstanceId, value: ExprId) {
        self.steps.push(Step::FieldStateWrite { state, domain, value });
    }

    /// `stepEvent(block, condition)`.
    pub fn step_event(&mut self, block: crate::ident::BlockId, condition: ExprId) {
        self.steps.push(Step::Event { block, condition });
    }

    /// `stepRenderPass(block, inputs)`.
    pub fn step_render_pass(&mut self, block: crate::ident::BlockId, inputs: Vec<ExprId>) {
        self.steps.push(Step::RenderPass { block, inputs });
    }
}

/// Everything pass 9 (block lowering) produced, still in per-block emission
/// order; pass 10 (`schedule::build_schedule`) stabilizes this into the
/// program's final step order.
pub struct LoweredPatch {
    /// Hash-consed expression arena.
    pub exprs: ExprBuilder,
    /// Slot storage layout.
    pub slots: SlotTable,
    /// Schedule steps in emission order.
    pub steps: Vec<Step>,
    /// Per-instance-domain lane counts observed while lowering.
    pub lane_counts: LaneCounts,
    /// Stable per-lane identity for each instance domain.
    pub identity_vectors: BTreeMap<InstanceId, Vec<TargetId>>,
}

/// Pass 9: lowers every block in `order` (a dependency order from pass 8,
/// upstream before downstream) into IR expressions, slot allocations, and
/// schedule steps, via each block's registry-declared [`LowerFn`].
///
/// Unregistered block types were already diagnosed by earlier passes (they
/// could never have resolved a type); a lookup failure here is only possible
/// if the patch was mutated between passes, and is treated as a lowering
/// failure for that block rather than a silent skip.
pub fn lower_patch(patch: &Patch, registry: &BlockRegistry, order: &DependencyOrder, symbols: &mut SymbolTable, diagnostics: &mut DiagnosticSink) -> Result<LoweredPatch, CompileError> {
    let mut exprs = ExprBuilder::new();
    let mut slots = SlotTable::new();
    let mut steps = Vec::new();

    {
        let mut ctx = LowerCtx {
            exprs: &mut exprs,
            slots: &mut slots,
            steps: &mut steps,
            diagnostics,
            symbols,
        };
        for &block_id in &order.order {
            let Some(block) = patch.block(block_id) else { continue };
            let def = registry.lookup(&block.type_tag).map_err(|e| CompileError::Lowering(LowerError::new(block.type_tag.clone(), e.to_string())))?;
            (def.lower)(&mut ctx, block, block_id)?;
        }
    }

    let (lane_counts, identity_vectors) = domain_identities(patch);

    Ok(LoweredPatch {
        exprs,
        slots,
        steps,
        lane_counts,
        identity_vectors,
    })
}

/// Derives each concrete instance domain's lane count and stable per-lane
/// identity vector from the ports bound to it. Lane count is read from the
/// first `lane_count` param found on a block with a port in that domain
/// (defaulting to 1 if none declares one); identity is a deterministic
/// `TargetId` per lane, addressed by domain and lane index so it survives
/// recompiles that don't touch that domain's membership.
fn domain_identities(patch: &Patch) -> (LaneCounts, BTreeMap<InstanceId, Vec<TargetId>>) {
    let mut lane_counts: LaneCounts = LaneCounts::default();
    for (_, block) in patch.iter_blocks() {
        for port in block.inputs.iter().map(|p| &p.ty).chain(block.outputs.iter().map(|p| &p.ty)) {
            if let Extent::Many(domain) = port.extent {
                lane_counts.entry(domain).or_insert(1);
                if let Some(crate::patch::block::ParamValue::Int(count)) = block.param("lane_count") {
                    lane_counts.insert(domain, u32::try_from(*count).unwrap_or(1));
                }
            }
        }
    }

    let mut identity_vectors = BTreeMap::new();
    for (&domain, &count) in &lane_counts {
        let lanes = (0..count).map(|lane| make_target_id(&format!("domain:{}:{lane}", domain.0))).collect();
        identity_vectors.insert(domain, lanes);
    }

    (lane_counts, identity_vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::BlockId;
    use crate::types::{Extent, Unit};

    #[test]
    fn alloc_and_step_emission() {
        let mut exprs = ExprBuilder::new();
        let mut slots = SlotTable::new();
        let mut steps = Vec::new();
        let mut diagnostics = DiagnosticSink::default();
        let mut symbols = SymbolTable::new();
        let mut ctx = LowerCtx {
            exprs: &mut exprs,
            slots: &mut slots,
            steps: &mut steps,
            diagnostics: &mut diagnostics,
            symbols: &mut symbols,
        };
        let ty = CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One);
        let c = ctx.const_value(ConstValue::Float(1.0), ty);
        let slot = ctx.alloc_value_slot(SlotKind::F32, 1);
        ctx.step_eval_sig(c, slot);
        assert_eq!(steps.len(), 1);
        let _ = BlockId(0);
    }
}
