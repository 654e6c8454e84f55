//! Canonical type system: `(payload, unit, extent)`.

use crate::ident::InstanceId;

/// Concrete payload kind, or a variable awaiting resolution by payload
/// resolution (pass 1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Payload {
    /// Resolved to a concrete payload kind.
    Concrete(PayloadKind),
    /// Unresolved payload-generic variable, identified by its block-local slot.
    Variable(u32),
}

/// Concrete payload kinds a port can carry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PayloadKind {
    /// `f32` scalar.
    Float,
    /// `i32` scalar.
    Int,
    /// Boolean.
    Bool,
    /// 2-component vector.
    Vec2,
    /// 3-component vector.
    Vec3,
    /// Color (interpretation depends on `Unit`).
    Color,
    /// Opaque reference to a `shape2d` slot.
    Shape2d,
    /// Opaque reference to a camera projection.
    CameraProjection,
}

/// Unit tag. Which variants are meaningful depends on the payload; the
/// cardinality/unit solvers treat `Unit` as an opaque equatable/convertible
/// tag and never branch on `Payload` to validate it — that is the block
/// registry's responsibility at authoring time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Unit {
    /// Angle in `[0, 2π)` radians.
    Radians,
    /// Angle in `[0, 1)` turns.
    Turns,
    /// Normalized `[0, 1]` scalar with no angular meaning.
    Norm01,
    /// Unitless scalar.
    Scalar,
    /// Hue/saturation/lightness color.
    Hsl,
    /// Straight (non-premultiplied) RGBA in `[0, 1]` per channel.
    Rgba01,
    /// Unresolved unit variable, identified by its block-local slot.
    Variable(u32),
}

impl Unit {
    /// `true` if this is a `Variable` awaiting resolution.
    #[must_use]
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::Variable(_))
    }
}

/// Extent: cardinality plus, for fields, the instance domain they're keyed to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Extent {
    /// One value per frame (a "signal").
    One,
    /// `N` values per frame, keyed to `domain` (a "field").
    Many(InstanceId),
    /// Unresolved cardinality variable, identified by its block-local slot.
    Variable(u32),
}

impl Extent {
    /// `true` if this is a `Variable` awaiting resolution.
    #[must_use]
    pub const fn is_variable(self) -> bool {
        matches!(self, Self::Variable(_))
    }

    /// `true` if this is `Many` (a field).
    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(self, Self::Many(_))
    }
}

/// The full canonical type of a port or expression: `(payload, unit, extent)`.
/// Type equality requires all three components equal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CanonicalType {
    /// Payload component.
    pub payload: Payload,
    /// Unit component.
    pub unit: Unit,
    /// Extent component.
    pub extent: Extent,
}

impl CanonicalType {
    /// Constructs a fully concrete type.
    #[must_use]
    pub const fn concrete(payload: PayloadKind, unit: Unit, extent: Extent) -> Self {
        Self {
            payload: Payload::Concrete(payload),
            unit,
            extent,
        }
    }

    /// `true` if every component is concrete (no `Variable`s remain).
    #[must_use]
    pub const fn is_fully_resolved(&self) -> bool {
        matches!(self.payload, Payload::Concrete(_)) && !self.unit.is_variable() && !self.extent.is_variable()
    }
}

/// Declared combine mode for a multi-writer input port. A port property, not
/// a per-edge property.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CombineMode {
    /// Arithmetic sum.
    Sum,
    /// Arithmetic mean.
    Average,
    /// Componentwise maximum.
    Max,
    /// Componentwise minimum.
    Min,
    /// Last writer (by stable edge sort key) wins.
    Last,
    /// Boolean OR (bool payload only).
    Or,
    /// Boolean AND (bool payload only).
    And,
    /// Painter's-algorithm layering (color payload only).
    Layer,
}

impl CombineMode {
    /// Validates this combine mode against a concrete payload kind, per the
    /// authoritative payload/combine-mode table.
    #[must_use]
    pub const fn allowed_for(self, payload: PayloadKind) -> bool {
        match self {
            Self::Or | Self::And => matches!(payload, PayloadKind::Bool),
            Self::Layer => matches!(payload, PayloadKind::Color),
            Self::Sum | Self::Average | Self::Max | Self::Min => !matches!(payload, PayloadKind::Color),
            Self::Last => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_disallowed_on_color() {
        assert!(!CombineMode::Sum.allowed_for(PayloadKind::Color));
        assert!(CombineMode::Layer.allowed_for(PayloadKind::Color));
        assert!(!CombineMode::Layer.allowed_for(PayloadKind::Float));
    }

    #[test]
    fn bool_only_modes() {
        assert!(CombineMode::Or.allowed_for(PayloadKind::Bool));
        assert!(!CombineMode::Or.allowed_for(PayloadKind::Float));
    }

    #[test]
    fn type_equality_requires_all_three_components() {
        let a = CanonicalType::concrete(PayloadKind::Float, Unit::Norm01, Extent::One);
        let b = CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One);
        assert_ne!(a, b);
    }
}
