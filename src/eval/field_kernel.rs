//! Field kernel dispatcher: coord-space agnostic, per-lane
//! kernels writing into a caller-owned output buffer. Meaning applied to
//! coordinates is declared by blocks, not kernels.
//!
//! Every kernel is a pure per-lane function: `(lane_index, lane_count,
//! per-lane scalar inputs) -> stride-N output written into `out`. The field
//! materializer (`crate::materializer`) is responsible for gathering each
//! input field's per-lane values (handling the one-vs-many broadcast) before
//! calling [`FieldKernel::apply_lane`], and for looping this call across all
//! `N` lanes of a `materialize` step.

use crate::eval::opcode::Opcode;
use crate::eval::signal_kernel::{self, Waveform};

/// Named field kernel, dispatched by [`FieldKernel::apply_lane`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldKernel {
    /// Builds a stride-2 vector, zero-filling missing components.
    MakeVec2,
    /// Builds a stride-3 vector, zero-filling missing components.
    MakeVec3,
    /// HSL -> RGBA (stride-4 output, straight alpha).
    HsvToRgb,
    /// Polar `(radius, angle_turns)` -> Cartesian stride-2.
    PolarToCartesian,
    /// Evenly spaced points on a circle; stride-3 position, `z = 0`.
    CircleLayout,
    /// Evenly spaced points on a line segment; stride-3 position, `z = 0`.
    LineLayout,
    /// Evenly spaced points on a 2-D grid; stride-3 position, `z = 0`.
    GridLayout,
    /// Vertex `i` of a regular polygon; stride-3 position, `z = 0`.
    PolygonVertex,
    /// Deterministic per-lane jitter added to a stride-2 position.
    Jitter2d,
    /// Inverse-square attraction of a stride-2 position toward a target.
    Attract2d,
    /// Golden-angle spiral placement; stride-3 position, `z = 0`.
    FieldGoldenAngle,
    /// Multiplies a stride-4 color's alpha channel by a scalar.
    ApplyOpacity,
}

impl FieldKernel {
    /// Output stride (number of `f32` components per lane) this kernel writes.
    #[must_use]
    pub const fn output_stride(self) -> usize {
        match self {
            Self::MakeVec2 | Self::PolarToCartesian | Self::Jitter2d | Self::Attract2d => 2,
            Self::MakeVec3 | Self::CircleLayout | Self::LineLayout | Self::GridLayout | Self::PolygonVertex | Self::FieldGoldenAngle => 3,
            Self::HsvToRgb | Self::ApplyOpacity => 4,
        }
    }

    /// Evaluates this kernel for one lane.
    ///
    /// `inputs` are this lane's gathered per-lane scalar inputs (already
    /// broadcast by the materializer), in the fixed order each kernel
    /// documents below. `out` must be exactly
    /// [`FieldKernel::output_stride`] long.
    ///
    /// Every layout kernel **explicitly** writes `z = 0` for stride-3 output;
    /// zero-initialization of output buffers is never assumed.
    pub fn apply_lane(self, lane_index: u32, lane_count: u32, inputs: &[f32], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.output_stride());
        match self {
            Self::MakeVec2 => {
                out[0] = inputs.first().copied().unwrap_or(0.0);
                out[1] = inputs.get(1).copied().unwrap_or(0.0);
            }
            Self::MakeVec3 => {
                out[0] = inputs.first().copied().unwrap_or(0.0);
                out[1] = inputs.get(1).copied().unwrap_or(0.0);
                out[2] = inputs.get(2).copied().unwrap_or(0.0);
            }
            Self::HsvToRgb => {
                let (h, s, l, a) = (
                    inputs.first().copied().unwrap_or(0.0),
                    inputs.get(1).copied().unwrap_or(0.0),
                    inputs.get(2).copied().unwrap_or(0.0),
                    inputs.get(3).copied().unwrap_or(1.0),
                );
                let (r, g, b) = hsl_to_rgb(h, s, l);
                out[0] = r;
                out[1] = g;
                out[2] = b;
                out[3] = a;
            }
            Self::PolarToCartesian => {
                let radius = inputs.first().copied().unwrap_or(0.0);
                let angle_turns = inputs.get(1).copied().unwrap_or(0.0);
                let angle = angle_turns * std::f32::consts::TAU;
                out[0] = radius * Opcode::Cos.apply(&[angle]);
                out[1] = radius * Opcode::Sin.apply(&[angle]);
            }
            Self::CircleLayout => {
                let radius = inputs.first().copied().unwrap_or(1.0);
                let t = if lane_count <= 1 {
                    0.0
                } else {
                    lane_index as f32 / lane_count as f32
                };
                let angle = t * std::f32::consts::TAU;
                out[0] = radius * Opcode::Cos.apply(&[angle]);
                out[1] = radius * Opcode::Sin.apply(&[angle]);
                out[2] = 0.0;
            }
            Self::LineLayout => {
                let (x0, y0, x1, y1) = (
                    inputs.first().copied().unwrap_or(0.0),
                    inputs.get(1).copied().unwrap_or(0.0),
                    inputs.get(2).copied().unwrap_or(1.0),
                    inputs.get(3).copied().unwrap_or(0.0),
                );
                let t = if lane_count <= 1 {
                    0.0
                } else {
                    lane_index as f32 / (lane_count - 1) as f32
                };
                out[0] = Opcode::Lerp.apply(&[x0, x1, t]);
                out[1] = Opcode::Lerp.apply(&[y0, y1, t]);
                out[2] = 0.0;
            }
            Self::GridLayout => {
                let cols = inputs.first().copied().unwrap_or(1.0).max(1.0) as u32;
                let spacing = inputs.get(1).copied().unwrap_or(1.0);
                let col = lane_index % cols;
                let row = lane_index / cols;
                out[0] = col as f32 * spacing;
                out[1] = row as f32 * spacing;
                out[2] = 0.0;
            }
            Self::PolygonVertex => {
                let radius = inputs.first().copied().unwrap_or(1.0);
                let sides = inputs.get(1).copied().unwrap_or(lane_count as f32).max(1.0);
                let angle = (lane_index as f32 / sides) * std::f32::consts::TAU;
                out[0] = radius * Opcode::Cos.apply(&[angle]);
                out[1] = radius * Opcode::Sin.apply(&[angle]);
                out[2] = 0.0;
            }
            Self::Jitter2d => {
                let (x, y, amount, seed) = (
                    inputs.first().copied().unwrap_or(0.0),
                    inputs.get(1).copied().unwrap_or(0.0),
                    inputs.get(2).copied().unwrap_or(0.0),
                    inputs.get(3).copied().unwrap_or(0.0),
                );
                let jx = signal_kernel::noise1d(lane_index as f32 * 2.0, seed as u32);
                let jy = signal_kernel::noise1d(lane_index as f32 * 2.0 + 1.0, seed as u32);
                out[0] = jx.mul_add(amount, x);
                out[1] = jy.mul_add(amount, y);
            }
            Self::Attract2d => {
                let (x, y, tx, ty, strength) = (
                    inputs.first().copied().unwrap_or(0.0),
                    inputs.get(1).copied().unwrap_or(0.0),
                    inputs.get(2).copied().unwrap_or(0.0),
                    inputs.get(3).copied().unwrap_or(0.0),
                    inputs.get(4).copied().unwrap_or(0.0),
                );
                let (dx, dy) = (tx - x, ty - y);
                let dist_sq = dx.mul_add(dx, dy * dy).max(1e-4);
                let falloff = strength / dist_sq;
                out[0] = x + dx * falloff;
                out[1] = y + dy * falloff;
            }
            Self::FieldGoldenAngle => {
                const GOLDEN_ANGLE: f32 = 2.399_963_2; // radians
                let spacing = inputs.first().copied().unwrap_or(1.0);
                let radius = spacing * (lane_index as f32).sqrt();
                let angle = lane_index as f32 * GOLDEN_ANGLE;
                out[0] = radius * Opcode::Cos.apply(&[angle]);
                out[1] = radius * Opcode::Sin.apply(&[angle]);
                out[2] = 0.0;
            }
            Self::ApplyOpacity => {
                out[0] = inputs.first().copied().unwrap_or(1.0);
                out[1] = inputs.get(1).copied().unwrap_or(1.0);
                out[2] = inputs.get(2).copied().unwrap_or(1.0);
                let a = inputs.get(3).copied().unwrap_or(1.0);
                let opacity = inputs.get(4).copied().unwrap_or(1.0);
                out[3] = a * opacity;
            }
        }
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (l, l, l);
    }
    let h = Opcode::Wrap01.apply(&[h]) * 6.0;
    let c = (1.0 - (2.0f32.mul_add(l, -1.0)).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = if h < 1.0 {
        (c, x, 0.0)
    } else if h < 2.0 {
        (x, c, 0.0)
    } else if h < 3.0 {
        (0.0, c, x)
    } else if h < 4.0 {
        (0.0, x, c)
    } else if h < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };
    (r + m, g + m, b + m)
}

/// Every opcode name and kernel name present in the signal evaluator and
/// waveform/easing tables is enumerable here, for the cross-evaluator
/// coverage check. Since
/// [`crate::eval::signal_kernel`]'s scalar math and this module's kernels
/// both route through [`Opcode::apply`] for generic math, the only thing
/// left to check is that `FieldKernel`'s match arms exhaustively cover
/// [`FieldKernel`]'s variants — which `rustc` already enforces at compile
/// time for the non-wildcard match in `apply_lane`.
pub const KNOWN_WAVEFORMS: &[Waveform] = &[
    Waveform::OscSin,
    Waveform::OscCos,
    Waveform::OscTan,
    Waveform::Triangle,
    Waveform::Square,
    Waveform::Sawtooth,
];
