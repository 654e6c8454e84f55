//! Domain-specific scalar->scalar "signal kernel" table: not
//! generic math, so kept separate from [`crate::eval::opcode`]'s table. Both
//! tables are consulted by [`crate::eval::field_kernel`] so the field
//! materializer and signal evaluator stay in lockstep.

use crate::eval::opcode::Opcode;
use crate::types::CombineMode;

const TAU: f32 = std::f32::consts::TAU;

/// Periodic waveform family driven by a phase input in `[0, 1)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Waveform {
    /// `sin(phase * 2π)`.
    OscSin,
    /// `cos(phase * 2π)`.
    OscCos,
    /// `tan(phase * 2π)`.
    OscTan,
    /// Triangle wave, range `[-1, 1]`.
    Triangle,
    /// Square wave, range `{-1, 1}`.
    Square,
    /// Sawtooth wave, range `[-1, 1]`.
    Sawtooth,
}

impl Waveform {
    /// Evaluates this waveform at `phase` (expected in `[0, 1)`; out-of-range
    /// phases are wrapped via [`Opcode::Wrap01`] first so callers never need
    /// to pre-normalize).
    #[must_use]
    pub fn eval(self, phase: f32) -> f32 {
        let p = Opcode::Wrap01.apply(&[phase]);
        match self {
            Self::OscSin => Opcode::Sin.apply(&[p * TAU]),
            Self::OscCos => Opcode::Cos.apply(&[p * TAU]),
            Self::OscTan => Opcode::Tan.apply(&[p * TAU]),
            Self::Triangle => 4.0 * (p - (p + 0.5).floor()).abs() - 1.0,
            Self::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sawtooth => 2.0 * p - 1.0,
        }
    }
}

/// Easing curve family, always clamped to `[0, 1]` input and output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Easing {
    /// No change (identity, after clamping).
    Linear,
    /// Quadratic ease-in.
    QuadIn,
    /// Quadratic ease-out.
    QuadOut,
    /// Quadratic ease-in-out.
    QuadInOut,
    /// Cubic ease-in.
    CubicIn,
    /// Cubic ease-out.
    CubicOut,
    /// Cubic ease-in-out.
    CubicInOut,
}

impl Easing {
    /// Evaluates this curve at `t`, clamping `t` to `[0, 1]` first and
    /// guaranteeing the result is also within `[0, 1]`.
    #[must_use]
    pub fn eval(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadIn => t * t,
            Self::QuadOut => t * (2.0 - t),
            Self::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Self::CubicIn => t * t * t,
            Self::CubicOut => {
                let u = t - 1.0;
                u * u * u + 1.0
            }
            Self::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = 2.0f32.mul_add(t, -2.0);
                    0.5f32.mul_add(u * u * u, 1.0)
                }
            }
        }
    }
}

/// `smoothstep(edge0, edge1, x)`: Hermite-interpolated, clamped to `[0, 1]`.
#[must_use]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `step(edge, x)`: `0` if `x < edge`, else `1`.
#[must_use]
pub fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

/// Deterministic 1-D value noise at `x`, seeded by `seed`. Built from the
/// same splitmix-style bit mixing as [`Opcode::Hash`] so the whole scalar
/// math surface shares one deterministic hashing primitive rather than two.
#[must_use]
pub fn noise1d(x: f32, seed: u32) -> f32 {
    let xi = libm::floorf(x);
    let xf = x - xi;
    let h00 = lattice_hash(xi as i64, seed);
    let h01 = lattice_hash(xi as i64 + 1, seed);
    let t = xf * xf * (3.0 - 2.0 * xf);
    h00 + (h01 - h00) * t
}

fn lattice_hash(i: i64, seed: u32) -> f32 {
    let mut x = (i as u64) ^ (u64::from(seed) << 32);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    let unit = ((x >> 40) as f32) / ((u32::MAX >> 8) as f32).max(1.0);
    unit * 2.0 - 1.0
}

/// Applies a [`CombineMode`]'s reduction semantics to a set of writer
/// values, in `Edge::sort_key` order (required for `Last`). Identities for
/// empty input: `sum=0, average=0, max=-inf, min=+inf, last=0`.
#[must_use]
pub fn combine(mode: CombineMode, values: &[f32]) -> f32 {
    if values.is_empty() {
        return match mode {
            CombineMode::Sum | CombineMode::Average | CombineMode::Last => 0.0,
            CombineMode::Max | CombineMode::Or => f32::NEG_INFINITY,
            CombineMode::Min | CombineMode::And => f32::INFINITY,
            CombineMode::Layer => 0.0,
        };
    }
    match mode {
        CombineMode::Sum => Opcode::Add.apply(values),
        CombineMode::Average => Opcode::Add.apply(values) / values.len() as f32,
        CombineMode::Max => Opcode::Max.apply(values),
        CombineMode::Min => Opcode::Min.apply(values),
        CombineMode::Last => *values.last().unwrap_or(&0.0),
        CombineMode::Or => {
            if values.iter().any(|&v| v != 0.0) {
                1.0
            } else {
                0.0
            }
        }
        CombineMode::And => {
            if values.iter().all(|&v| v != 0.0) {
                1.0
            } else {
                0.0
            }
        }
        // Layer (painter's algorithm over color) operates on vec4 color, not
        // raw scalars; the scalar-per-channel reduction a caller uses here is
        // "last writer wins" per channel, matching opaque-over compositing
        // when all layers are fully opaque. Full alpha compositing is a
        // render-assembler concern, not this combine step.
        CombineMode::Layer => *values.last().unwrap_or(&0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oscillator_sample_points() {
        assert!((Waveform::OscSin.eval(0.0)).abs() < 1e-5);
        assert!((Waveform::OscSin.eval(0.25) - 1.0).abs() < 1e-4);
        assert!((Waveform::OscSin.eval(0.5)).abs() < 1e-4);
        assert!((Waveform::OscSin.eval(0.75) + 1.0).abs() < 1e-4);
    }

    #[test]
    fn easing_clamped_to_unit_interval() {
        for e in [Easing::QuadIn, Easing::CubicInOut] {
            assert_eq!(e.eval(-1.0), e.eval(0.0));
            assert_eq!(e.eval(2.0), e.eval(1.0));
            assert!((0.0..=1.0).contains(&e.eval(0.3)));
        }
    }

    #[test]
    fn combine_empty_identities() {
        assert_eq!(combine(CombineMode::Sum, &[]), 0.0);
        assert_eq!(combine(CombineMode::Average, &[]), 0.0);
        assert_eq!(combine(CombineMode::Max, &[]), f32::NEG_INFINITY);
        assert_eq!(combine(CombineMode::Min, &[]), f32::INFINITY);
        assert_eq!(combine(CombineMode::Last, &[]), 0.0);
    }

    #[test]
    fn noise_is_deterministic() {
        assert_eq!(noise1d(1.3, 7), noise1d(1.3, 7));
        assert_ne!(noise1d(1.3, 7), noise1d(1.3, 8));
    }
}
