//! Table-driven scalar opcode dispatcher.
//!
//! All transcendental functions route through `libm` rather than `std`'s
//! platform-dependent intrinsics, so two builds on different targets produce
//! bit-identical results for the same inputs. A `CompiledProgram`'s
//! *behavior* must be reproducible, even though the fingerprint itself only
//! covers structure.
//!
//! The cross-evaluator coverage check — every opcode must be implemented
//! identically by the signal evaluator and the field materializer — is
//! enforced by construction here: both
//! [`eval_opcode`](crate::eval::signal_kernel::eval_opcode_scalar) and the
//! field kernel's elementwise opcode map call the single [`Opcode::apply`]
//! defined in this module, so there is exactly one opcode definition per
//! behavior.

/// A scalar opcode. Arity is fixed per opcode and enforced at IR-build time,
/// not at evaluation time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    // Unary
    /// Negation.
    Neg,
    /// Absolute value.
    Abs,
    /// Sine (radians).
    Sin,
    /// Cosine (radians).
    Cos,
    /// Tangent (radians).
    Tan,
    /// Wrap into `[0, 1)`.
    Wrap01,
    /// Floor.
    Floor,
    /// Ceiling.
    Ceil,
    /// Round to nearest.
    Round,
    /// Fractional part.
    Fract,
    /// Square root.
    Sqrt,
    /// `e^x`.
    Exp,
    /// Natural log.
    Log,
    /// Sign (`-1`, `0`, or `1`).
    Sign,
    // Binary
    /// Subtraction (`a - b`).
    Sub,
    /// Division (`a / b`).
    Div,
    /// Floating modulo (`a mod b`, result has the sign of `b`).
    Mod,
    /// `a^b`.
    Pow,
    /// Deterministic 2-input hash, returned as `[0, 1)`.
    Hash,
    // Ternary
    /// Clamp `x` into `[lo, hi]`.
    Clamp,
    /// Linear interpolation `a + (b - a) * t`.
    Lerp,
    // Variadic (arity >= 1)
    /// Sum of all inputs.
    Add,
    /// Product of all inputs.
    Mul,
    /// Maximum of all inputs.
    Max,
    /// Minimum of all inputs.
    Min,
}

/// Arity class of an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arity {
    /// Exactly one operand.
    Unary,
    /// Exactly two operands.
    Binary,
    /// Exactly three operands.
    Ternary,
    /// One or more operands.
    Variadic,
}

impl Arity {
    /// `true` if `n` operands satisfy this arity class.
    #[must_use]
    pub const fn accepts(self, n: usize) -> bool {
        match self {
            Self::Unary => n == 1,
            Self::Binary => n == 2,
            Self::Ternary => n == 3,
            Self::Variadic => n >= 1,
        }
    }
}

/// Error raised when an opcode is applied with the wrong operand count.
/// Raised deterministically at IR-build time, never deferred to evaluation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("opcode {opcode:?} requires {arity:?} operands, got {got}")]
pub struct ArityError {
    /// The opcode that was misapplied.
    pub opcode: Opcode,
    /// Its required arity class.
    pub arity: Arity,
    /// The operand count actually supplied.
    pub got: usize,
}

impl Opcode {
    /// All opcodes, in a stable declaration order. Used by the cross-evaluator
    /// coverage check.
    pub const ALL: &'static [Self] = &[
        Self::Neg,
        Self::Abs,
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Wrap01,
        Self::Floor,
        Self::Ceil,
        Self::Round,
        Self::Fract,
        Self::Sqrt,
        Self::Exp,
        Self::Log,
        Self::Sign,
        Self::Sub,
        Self::Div,
        Self::Mod,
        Self::Pow,
        Self::Hash,
        Self::Clamp,
        Self::Lerp,
        Self::Add,
        Self::Mul,
        Self::Max,
        Self::Min,
    ];

    /// This opcode's arity class.
    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Neg
            | Self::Abs
            | Self::Sin
            | Self::Cos
            | Self::Tan
            | Self::Wrap01
            | Self::Floor
            | Self::Ceil
            | Self::Round
            | Self::Fract
            | Self::Sqrt
            | Self::Exp
            | Self::Log
            | Self::Sign => Arity::Unary,
            Self::Sub | Self::Div | Self::Mod | Self::Pow | Self::Hash => Arity::Binary,
            Self::Clamp | Self::Lerp => Arity::Ternary,
            Self::Add | Self::Mul | Self::Max | Self::Min => Arity::Variadic,
        }
    }

    /// Validates `operands.len()` against this opcode's arity, the
    /// deterministic IR-build-time check this evaluator requires.
    pub fn check_arity(self, operands: usize) -> Result<(), ArityError> {
        let arity = self.arity();
        if arity.accepts(operands) {
            Ok(())
        } else {
            Err(ArityError {
                opcode: self,
                arity,
                got: operands,
            })
        }
    }

    /// Applies this opcode to `operands`, which must already satisfy
    /// [`Opcode::check_arity`] (debug-asserted, not re-validated: by the
    /// time an `Opcode` expression exists in the IR, arity was checked at
    /// build time).
    #[must_use]
    pub fn apply(self, operands: &[f32]) -> f32 {
        debug_assert!(self.arity().accepts(operands.len()));
        match self {
            Self::Neg => -operands[0],
            Self::Abs => libm::fabsf(operands[0]),
            Self::Sin => libm::sinf(operands[0]),
            Self::Cos => libm::cosf(operands[0]),
            Self::Tan => libm::tanf(operands[0]),
            Self::Wrap01 => {
                let x = operands[0] - libm::floorf(operands[0]);
                if x < 0.0 {
                    x + 1.0
                } else {
                    x
                }
            }
            Self::Floor => libm::floorf(operands[0]),
            Self::Ceil => libm::ceilf(operands[0]),
            Self::Round => libm::roundf(operands[0]),
            Self::Fract => operands[0] - libm::floorf(operands[0]),
            Self::Sqrt => libm::sqrtf(operands[0]),
            Self::Exp => libm::expf(operands[0]),
            Self::Log => libm::logf(operands[0]),
            Self::Sign => {
                if operands[0] > 0.0 {
                    1.0
                } else if operands[0] < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Self::Sub => operands[0] - operands[1],
            Self::Div => operands[0] / operands[1],
            Self::Mod => {
                let (a, b) = (operands[0], operands[1]);
                let r = libm::fmodf(a, b);
                if r != 0.0 && (r < 0.0) != (b < 0.0) {
                    r + b
                } else {
                    r
                }
            }
            Self::Pow => libm::powf(operands[0], operands[1]),
            Self::Hash => deterministic_hash01(operands[0], operands[1]),
            Self::Clamp => operands[0].clamp(operands[1].min(operands[2]), operands[1].max(operands[2])),
            Self::Lerp => operands[0] + (operands[1] - operands[0]) * operands[2],
            Self::Add => operands.iter().copied().sum(),
            Self::Mul => operands.iter().copied().product(),
            Self::Max => operands.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Self::Min => operands.iter().copied().fold(f32::INFINITY, f32::min),
        }
    }

    /// Identity value for a variadic opcode applied to zero combine-mode
    /// inputs: `sum=0, average=0, max=-inf, min=+inf, last=0`.
    /// Only meaningful for `Add`/`Max`/`Min`; combine-mode identities for
    /// `average`/`last` are handled directly by
    /// [`crate::eval::signal_kernel`] since they are not raw opcodes.
    #[must_use]
    pub const fn variadic_identity(self) -> Option<f32> {
        match self {
            Self::Add => Some(0.0),
            Self::Max => Some(f32::NEG_INFINITY),
            Self::Min => Some(f32::INFINITY),
            _ => None,
        }
    }
}

/// Deterministic hash of two floats into `[0, 1)`. Treats bit patterns as
/// the hash input so `NaN`/`-0.0` are handled without platform-dependent
/// float comparison, and mixes with a fixed-point multiplicative hash
/// (splitmix64-style) rather than relying on `std`'s `Hash` (whose output is
/// not guaranteed stable across compiler versions).
#[must_use]
fn deterministic_hash01(a: f32, b: f32) -> f32 {
    let mut x = u64::from(a.to_bits()) << 32 | u64::from(b.to_bits());
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    // Top 24 bits give a clean f32 mantissa's worth of entropy.
    ((x >> 40) as f32) / ((u32::MAX >> 8) as f32).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_enforced_at_build_time_not_eval() {
        assert!(Opcode::Clamp.check_arity(3).is_ok());
        assert_eq!(
            Opcode::Clamp.check_arity(2),
            Err(ArityError {
                opcode: Opcode::Clamp,
                arity: Arity::Ternary,
                got: 2
            })
        );
    }

    #[test]
    fn variadic_empty_identities() {
        assert_eq!(Opcode::Add.apply(&[]), 0.0);
        assert_eq!(Opcode::Max.apply(&[]), f32::NEG_INFINITY);
        assert_eq!(Opcode::Min.apply(&[]), f32::INFINITY);
    }

    #[test]
    fn mod_matches_math_sign_of_divisor() {
        assert!((Opcode::Mod.apply(&[-1.0, 4.0]) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn hash_is_deterministic_and_bounded() {
        let h1 = Opcode::Hash.apply(&[0.3, 0.7]);
        let h2 = Opcode::Hash.apply(&[0.3, 0.7]);
        assert_eq!(h1, h2);
        assert!((0.0..1.0).contains(&h1));
    }
}
