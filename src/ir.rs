//! Hash-consed IR expressions.
//!
//! Two expression families share one arena and one `ExprId` space:
//! `ValueExpr` (scalar-or-vector per frame) and `FieldExpr` (`N` lanes per
//! frame). Identity is structural: two expressions with the same shape and
//! operands get the same `ExprId`, interned as a domain-separated BLAKE3
//! hash of their content (`ident.rs`) rather than an arbitrary counter — so
//! identical subtrees across a whole compilation collapse to one arena slot
//! automatically, with no separate equality pass.

use blake3::Hasher;
use rustc_hash::FxHashMap;

use crate::eval::{FieldKernel, Opcode};
use crate::ident::{ExprId, SlotId, StateId};
use crate::types::{CanonicalType, PayloadKind};

/// A literal constant value baked into the IR at lowering time.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ConstValue {
    /// Floating-point literal.
    Float(f32),
    /// Integer literal.
    Int(i32),
    /// Boolean literal.
    Bool(bool),
}

impl ConstValue {
    fn hash_into(self, hasher: &mut Hasher) {
        match self {
            Self::Float(f) => {
                hasher.update(&[0]);
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Self::Int(i) => {
                hasher.update(&[1]);
                hasher.update(&i.to_le_bytes());
            }
            Self::Bool(b) => {
                hasher.update(&[2]);
                hasher.update(&[u8::from(b)]);
            }
        }
    }
}

/// Which per-lane intrinsic a field expression reads.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldIntrinsic {
    /// Raw lane index `0..N`.
    Index,
    /// Lane index normalized to `[0, 1)` (or `0` when `N <= 1`).
    NormalizedIndex,
    /// Deterministic per-lane id derived from the lane's stable identity.
    RandomId,
}

/// A scalar-or-vector expression, evaluated once per frame.
#[derive(Clone, PartialEq, Debug)]
pub enum ValueExpr {
    /// A literal constant.
    Const(ConstValue),
    /// Reads the current value of a value slot.
    SlotRead(SlotId),
    /// Reads a stateful block's state slot (returns the *previous* frame's
    /// value during Phase 1).
    StateRead(StateId),
    /// Applies a scalar opcode to its operands.
    Opcode(Opcode, Vec<ExprId>),
    /// Constructs a vector/color payload from scalar components.
    Construct(PayloadKind, Vec<ExprId>),
    /// Extracts component `index` from a vector/color-valued expression.
    Extract(ExprId, u8),
    /// A reference to a `shape2d` slot's topology, used by render-pass steps.
    ShapeRef {
        /// Topology identifier (registry-defined, opaque here).
        topology_id: u32,
        /// Optional control-point field expression.
        control_points: Option<ExprId>,
    },
}

/// An `N`-lanes-per-frame expression, keyed to an instance domain.
#[derive(Clone, PartialEq, Debug)]
pub enum FieldExpr {
    /// A per-lane intrinsic.
    Intrinsic(FieldIntrinsic),
    /// Applies a named field kernel to its (already-resolved) operand
    /// expressions. Builder call site (`kernel_map` vs `kernel_zip`)
    /// determines which operands were broadcast from a signal before
    /// reaching here; by evaluation time the distinction is immaterial —
    /// every operand is already a field expression of the same domain.
    Kernel(FieldKernel, Vec<ExprId>),
    /// Replicates a one-valued expression across every lane of a domain.
    Broadcast(ExprId),
}

#[derive(Clone, PartialEq, Debug)]
enum ExprNode {
    Value(ValueExpr),
    Field(FieldExpr),
}

/// An interned expression: its node plus its solver-resolved canonical type.
#[derive(Clone, Debug)]
pub struct ExprData {
    node: ExprNode,
    /// The canonical type this expression was built with — always derived
    /// from the solver-resolved `outType`, never from a static literal.
    pub ty: CanonicalType,
}

impl ExprData {
    /// Borrow this expression as a `ValueExpr`, if it is one.
    #[must_use]
    pub const fn as_value(&self) -> Option<&ValueExpr> {
        match &self.node {
            ExprNode::Value(v) => Some(v),
            ExprNode::Field(_) => None,
        }
    }

    /// Borrow this expression as a `FieldExpr`, if it is one.
    #[must_use]
    pub const fn as_field(&self) -> Option<&FieldExpr> {
        match &self.node {
            ExprNode::Field(f) => Some(f),
            ExprNode::Value(_) => None,
        }
    }
}

/// Hash-consing arena for IR expressions. One instance is shared across an
/// entire compilation so identical subtrees emitted by unrelated blocks
/// collapse to the same `ExprId`: the builder hash-conses on the structural
/// identity of expressions so identical subtrees are shared across the
/// whole compilation.
#[derive(Clone, Default, Debug)]
pub struct ExprBuilder {
    arena: Vec<ExprData>,
    by_id: FxHashMap<ExprId, u32>,
}

impl ExprBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a previously-interned expression by id.
    #[must_use]
    pub fn get(&self, id: ExprId) -> Option<&ExprData> {
        self.by_id.get(&id).and_then(|&idx| self.arena.get(idx as usize))
    }

    /// Number of distinct expressions interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// `true` if no expressions have been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    fn intern(&mut self, node: ExprNode, ty: CanonicalType) -> ExprId {
        let id = structural_id(&node, &ty);
        if let std::collections::hash_map::Entry::Vacant(e) = self.by_id.entry(id) {
            let idx = u32::try_from(self.arena.len()).unwrap_or_else(|_| {
                debug_assert!(false, "expression arena overflowed u32 capacity");
                u32::MAX
            });
            self.arena.push(ExprData { node, ty });
            e.insert(idx);
        }
        id
    }

    /// `const(value)`.
    pub fn const_value(&mut self, value: ConstValue, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::Const(value)), ty)
    }

    /// `slotRead(slot)`.
    pub fn slot_read(&mut self, slot: SlotId, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::SlotRead(slot)), ty)
    }

    /// `stateRead(state)`.
    pub fn state_read(&mut self, state: StateId, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::StateRead(state)), ty)
    }

    /// `opcode(op, operands)`. The caller (block-lowering code) is
    /// responsible for having already validated arity via
    /// `Opcode::check_arity`; this constructor does not re-check, matching
    /// arity errors are deterministic at IR-build time, not at evaluation
    /// time — the check happens once, at the call site that owns the
    /// `Result`, not buried in the hash-consing arena.
    pub fn opcode(&mut self, op: Opcode, operands: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::Opcode(op, operands)), ty)
    }

    /// `construct(payload, components)`.
    pub fn construct(&mut self, payload: PayloadKind, components: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::Construct(payload, components)), ty)
    }

    /// `extract(expr, index)`.
    pub fn extract(&mut self, expr: ExprId, index: u8, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Value(ValueExpr::Extract(expr, index)), ty)
    }

    /// `sigShapeRef(topology, controlPoints)`.
    pub fn shape_ref(&mut self, topology_id: u32, control_points: Option<ExprId>, ty: CanonicalType) -> ExprId {
        self.intern(
            ExprNode::Value(ValueExpr::ShapeRef {
                topology_id,
                control_points,
            }),
            ty,
        )
    }

    /// A field intrinsic (`index`, `normalizedIndex`, `randomId`).
    pub fn field_intrinsic(&mut self, intrinsic: FieldIntrinsic, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Field(FieldExpr::Intrinsic(intrinsic)), ty)
    }

    /// `kernelMap(kernel, operands)`: one or more `many` operands, combined
    /// elementwise with any `one` operands the caller already broadcast.
    pub fn kernel_map(&mut self, kernel: FieldKernel, operands: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Field(FieldExpr::Kernel(kernel, operands)), ty)
    }

    /// `kernelZip(kernel, operands)`: combines multiple `many` operands of
    /// the same domain elementwise. Structurally identical to
    /// [`ExprBuilder::kernel_map`] at the IR level; kept as a distinct
    /// builder entry point because cardinality solving treats
    /// zip-member ports as a distinct broadcast group.
    pub fn kernel_zip(&mut self, kernel: FieldKernel, operands: Vec<ExprId>, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Field(FieldExpr::Kernel(kernel, operands)), ty)
    }

    /// `broadcast(value)`: replicates a `one`-valued expression to every
    /// lane of the output's domain.
    pub fn broadcast(&mut self, value: ExprId, ty: CanonicalType) -> ExprId {
        self.intern(ExprNode::Field(FieldExpr::Broadcast(value)), ty)
    }
}

fn structural_id(node: &ExprNode, ty: &CanonicalType) -> ExprId {
    let mut hasher = Hasher::new();
    hasher.update(b"expr:");
    hash_type(&mut hasher, ty);
    match node {
        ExprNode::Value(v) => hash_value_expr(&mut hasher, v),
        ExprNode::Field(f) => hash_field_expr(&mut hasher, f),
    }
    ExprId(hasher.finalize().into())
}

fn hash_type(hasher: &mut Hasher, ty: &CanonicalType) {
    // A debug-format encoding is sufficient here: types are small closed
    // enums, this hash only needs to be *collision-free for distinct
    // values*, not a compact wire format. No wire format exists for
    // CanonicalType; only the shape2d record has a fixed wire layout.
    hasher.update(format!("{ty:?}").as_bytes());
}

fn hash_value_expr(hasher: &mut Hasher, v: &ValueExpr) {
    match v {
        ValueExpr::Const(c) => {
            hasher.update(b"const");
            c.hash_into(hasher);
        }
        ValueExpr::SlotRead(slot) => {
            hasher.update(b"slotRead");
            hasher.update(&slot.0.to_le_bytes());
        }
        ValueExpr::StateRead(state) => {
            hasher.update(b"stateRead");
            hasher.update(state.as_bytes());
        }
        ValueExpr::Opcode(op, operands) => {
            hasher.update(b"opcode");
            hasher.update(&[*op as u8]);
            hash_ids(hasher, operands);
        }
        ValueExpr::Construct(payload, components) => {
            hasher.update(b"construct");
            hasher.update(&[*payload as u8]);
            hash_ids(hasher, components);
        }
        ValueExpr::Extract(expr, index) => {
            hasher.update(b"extract");
            hasher.update(expr.as_bytes());
            hasher.update(&[*index]);
        }
        ValueExpr::ShapeRef {
            topology_id,
            control_points,
        } => {
            hasher.update(b"shapeRef");
            hasher.update(&topology_id.to_le_bytes());
            match control_points {
                Some(id) => {
                    hasher.update(&[1]);
                    hasher.update(id.as_bytes());
                }
                None => {
                    hasher.update(&[0]);
                }
            }
        }
    }
}

fn hash_field_expr(hasher: &mut Hasher, f: &FieldExpr) {
    match f {
        FieldExpr::Intrinsic(i) => {
            hasher.update(b"intrinsic");
            hasher.update(&[*i as u8]);
        }
        FieldExpr::Kernel(kernel, operands) => {
            hasher.update(b"kernel");
            hasher.update(&[*kernel as u8]);
            hash_ids(hasher, operands);
        }
        FieldExpr::Broadcast(value) => {
            hasher.update(b"broadcast");
            hasher.update(value.as_bytes());
        }
    }
}

fn hash_ids(hasher: &mut Hasher, ids: &[ExprId]) {
    hasher.update(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        hasher.update(id.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Extent, Unit};

    fn ty() -> CanonicalType {
        CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One)
    }

    #[test]
    fn identical_subtrees_share_an_id() {
        let mut b = ExprBuilder::new();
        let c1 = b.const_value(ConstValue::Float(1.0), ty());
        let c2 = b.const_value(ConstValue::Float(1.0), ty());
        assert_eq!(c1, c2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn distinct_operands_produce_distinct_ids() {
        let mut b = ExprBuilder::new();
        let a = b.const_value(ConstValue::Float(1.0), ty());
        let c = b.const_value(ConstValue::Float(2.0), ty());
        let sum_ac = b.opcode(Opcode::Add, vec![a, c], ty());
        let sum_ca = b.opcode(Opcode::Add, vec![c, a], ty());
        assert_ne!(sum_ac, sum_ca, "operand order is part of structural identity");
    }

    #[test]
    fn type_is_part_of_identity() {
        let mut b = ExprBuilder::new();
        let slot = SlotId(0);
        let a = b.slot_read(slot, ty());
        let other_ty = CanonicalType::concrete(PayloadKind::Float, Unit::Norm01, Extent::One);
        let b_id = b.slot_read(slot, other_ty);
        assert_ne!(a, b_id);
    }
}
