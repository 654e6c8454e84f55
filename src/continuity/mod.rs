//! Continuity subsystem: preserves a target's effective value
//! across graph edits and element-set changes by blending a freshly
//! computed "base" buffer with a per-target gauge/slew history.
//!
//! A snapshot-then-diff discipline: a continuity target's state is captured
//! before the new frame's buffers are requested, so the "before" picture is
//! never clobbered by the allocation that produces the "after" one.

pub mod lane_mapping;

use std::collections::BTreeMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
use crate::eval::Easing;
use crate::ident::TargetId;

pub use lane_mapping::{build_lane_mapping, DuplicatePolicy, IdentityMode, LaneMapping};

/// How a continuity target responds to a newly computed base value each
/// frame.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContinuityPolicy {
    /// `effective = base`; no history kept.
    None,
    /// `effective = oldEffective` for mapped lanes, `base` for unmapped.
    Preserve,
    /// `effective = base + gauge`; gauge decays toward zero each frame.
    Slew,
    /// Same shape as `Slew`, with a policy-specific decay rate.
    Project,
    /// Blends `oldEffective` toward `base` over a fixed time window.
    Crossfade,
}

/// Per-frame continuity parameters that don't change with the target's
/// buffer contents.
#[derive(Clone, Copy, Debug)]
pub struct ContinuityParams {
    /// Applied policy.
    pub policy: ContinuityPolicy,
    /// Decay rate per second for `Slew`/`Project` (ignored otherwise).
    pub decay_rate: f32,
    /// Crossfade window, in seconds (ignored outside `Crossfade`).
    pub crossfade_window_s: f32,
    /// Easing curve `crossfade` uses to map elapsed/window into `[0, 1]`.
    pub easing: Easing,
    /// Seconds elapsed since this tick's previous tick.
    pub dt_s: f32,
    /// How a duplicate id within this target's identity vector is handled:
    /// `Strict` rejects the mapping and reports `DuplicateIdentity`,
    /// `Lenient` degrades to `byIndex` and reports it anyway.
    pub duplicate_policy: DuplicatePolicy,
}

/// One continuity target's persistent history across frames: a base
/// buffer, a slew buffer, a gauge buffer, and the identity vector seen
/// last tick.
#[derive(Clone, Default, Debug)]
pub struct ContinuityState {
    base_buf: Vec<f32>,
    slew_buf: Vec<f32>,
    gauge_buf: Vec<f32>,
    prev_identity: Vec<TargetId>,
    /// Seconds elapsed since the current domain change started (crossfade
    /// timing); reset to `0` whenever `apply` sees a new domain change.
    elapsed_since_change_s: f32,
}

impl ContinuityState {
    /// Creates an empty history (no previous frame to reference).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently stored effective buffer (`slewBuf`).
    #[must_use]
    pub fn effective(&self) -> &[f32] {
        &self.slew_buf
    }

    /// `true` if `identity` differs from the identity vector this target saw
    /// last tick, meaning a new/removed lane entered the domain.
    #[must_use]
    pub fn domain_changed(&self, identity: &[TargetId]) -> bool {
        self.prev_identity != identity
    }
}

/// Captured "before" snapshot taken prior to resizing a target's buffers.
struct CaptureContext {
    old_slew_snapshot: Vec<f32>,
    had_previous_state: bool,
}

fn capture(state: &ContinuityState) -> CaptureContext {
    CaptureContext {
        old_slew_snapshot: state.slew_buf.clone(),
        had_previous_state: !state.prev_identity.is_empty() || !state.slew_buf.is_empty(),
    }
}

/// Applies one tick of the continuity algorithm: snapshot, re-map lanes by
/// identity, seed the gauge on a domain change, blend per policy, and store
/// the result back for next tick.
///
/// `base` is this frame's freshly computed base buffer (stride-major:
/// lane `k`'s components occupy `base[k*stride..(k+1)*stride]`). `identity`
/// is the current frame's per-lane identity vector, `stride` the number of
/// components per lane, and `domain_change_this_frame` whether the lane
/// count or identity set changed since the previous tick.
///
/// Returns the new effective buffer, which the caller stores back into
/// `state` for the next tick. A duplicate id in `identity` or the target's
/// previous identity vector pushes a `DuplicateIdentity` diagnostic onto
/// `diagnostics`, regardless of which way `params.duplicate_policy` resolved
/// the mapping.
pub fn apply(
    state: &mut ContinuityState,
    target: TargetId,
    base: &[f32],
    identity: &[TargetId],
    stride: usize,
    domain_change_this_frame: bool,
    params: ContinuityParams,
    diagnostics: &mut DiagnosticSink,
) -> Vec<f32> {
    let capture_ctx = capture(state);

    let is_new_target = !capture_ctx.had_previous_state;
    if state.slew_buf.len() != base.len() {
        state.slew_buf = base.to_vec();
    }
    if state.gauge_buf.len() != base.len() {
        state.gauge_buf = vec![0.0; base.len()];
    }
    state.base_buf = base.to_vec();

    let mapping = build_lane_mapping(&state.prev_identity, identity, IdentityMode::ById, params.duplicate_policy);
    if mapping.duplicate_detected {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::DuplicateIdentity,
            Severity::Warn,
            TargetRef::Target(target),
            "continuity target's identity vector carries a duplicate id",
        ));
    }

    if is_new_target {
        state.slew_buf = base.to_vec();
        state.gauge_buf = vec![0.0; base.len()];
    } else if domain_change_this_frame && !matches!(params.policy, ContinuityPolicy::Crossfade) {
        initialize_gauge_on_domain_change(state, &capture_ctx.old_slew_snapshot, base, &mapping, stride);
        state.elapsed_since_change_s = 0.0;
    } else if domain_change_this_frame {
        state.elapsed_since_change_s = 0.0;
    }

    let effective = match params.policy {
        ContinuityPolicy::None => base.to_vec(),
        ContinuityPolicy::Preserve => preserve(&capture_ctx.old_slew_snapshot, base, &mapping, stride),
        ContinuityPolicy::Slew | ContinuityPolicy::Project => slew(state, base, params.decay_rate, params.dt_s),
        ContinuityPolicy::Crossfade => {
            state.elapsed_since_change_s += params.dt_s;
            crossfade(&capture_ctx.old_slew_snapshot, base, &mapping, stride, state.elapsed_since_change_s, params.crossfade_window_s, params.easing)
        }
    };

    state.slew_buf = effective.clone();
    state.prev_identity = identity.to_vec();
    effective
}

fn initialize_gauge_on_domain_change(state: &mut ContinuityState, old_effective: &[f32], base: &[f32], mapping: &LaneMapping, stride: usize) {
    let lane_count = mapping.new_to_old.len();
    let mut gauge = vec![0.0; lane_count * stride];
    for (k, &old_lane) in mapping.new_to_old.iter().enumerate() {
        if old_lane < 0 {
            continue;
        }
        let old_base = old_lane as usize * stride;
        let new_base = k * stride;
        for c in 0..stride {
            let old_v = old_effective.get(old_base + c).copied().unwrap_or(0.0);
            let new_base_v = base.get(new_base + c).copied().unwrap_or(0.0);
            gauge[new_base + c] = old_v - new_base_v;
        }
    }
    state.gauge_buf = gauge;
}

fn preserve(old_effective: &[f32], base: &[f32], mapping: &LaneMapping, stride: usize) -> Vec<f32> {
    let lane_count = mapping.new_to_old.len();
    let mut out = vec![0.0; lane_count * stride];
    for (k, &old_lane) in mapping.new_to_old.iter().enumerate() {
        let new_base = k * stride;
        if old_lane >= 0 {
            let old_base = old_lane as usize * stride;
            for c in 0..stride {
                out[new_base + c] = old_effective.get(old_base + c).copied().unwrap_or(0.0);
            }
        } else {
            for c in 0..stride {
                out[new_base + c] = base.get(new_base + c).copied().unwrap_or(0.0);
            }
        }
    }
    out
}

fn slew(state: &mut ContinuityState, base: &[f32], decay_rate: f32, dt_s: f32) -> Vec<f32> {
    let decay = (-decay_rate * dt_s).exp();
    let mut effective = vec![0.0; base.len()];
    for i in 0..base.len() {
        let gauge = state.gauge_buf.get(i).copied().unwrap_or(0.0) * decay;
        if let Some(cell) = state.gauge_buf.get_mut(i) {
            *cell = gauge;
        }
        effective[i] = base[i] + gauge;
    }
    effective
}

fn crossfade(old_effective: &[f32], base: &[f32], mapping: &LaneMapping, stride: usize, elapsed_s: f32, window_s: f32, easing: Easing) -> Vec<f32> {
    let t = if window_s <= 0.0 { 1.0 } else { (elapsed_s / window_s).clamp(0.0, 1.0) };
    let blend = easing.eval(t);
    let lane_count = mapping.new_to_old.len();
    let mut out = vec![0.0; lane_count * stride];
    for (k, &old_lane) in mapping.new_to_old.iter().enumerate() {
        let new_base = k * stride;
        if old_lane >= 0 {
            let old_base = old_lane as usize * stride;
            for c in 0..stride {
                let from = old_effective.get(old_base + c).copied().unwrap_or(0.0);
                let to = base.get(new_base + c).copied().unwrap_or(0.0);
                out[new_base + c] = from + (to - from) * blend;
            }
        } else {
            for c in 0..stride {
                out[new_base + c] = base.get(new_base + c).copied().unwrap_or(0.0);
            }
        }
    }
    out
}

/// Persistent continuity state for every target a program declares,
/// surviving recompiles keyed by `TargetId` stability.
pub type ContinuityStore = BTreeMap<TargetId, ContinuityState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> TargetId {
        TargetId([byte; 32])
    }

    fn params(policy: ContinuityPolicy) -> ContinuityParams {
        ContinuityParams {
            policy,
            decay_rate: 2.0,
            crossfade_window_s: 1.0,
            easing: Easing::Linear,
            dt_s: 1.0 / 60.0,
            duplicate_policy: DuplicatePolicy::Lenient,
        }
    }

    fn apply_for_test(state: &mut ContinuityState, base: &[f32], identity: &[TargetId], stride: usize, domain_change: bool, params: ContinuityParams) -> Vec<f32> {
        let mut sink = DiagnosticSink::new();
        apply(state, id(0), base, identity, stride, domain_change, params, &mut sink)
    }

    #[test]
    fn none_policy_always_tracks_base() {
        let mut state = ContinuityState::new();
        let identity = vec![id(1)];
        let out = apply_for_test(&mut state, &[5.0], &identity, 1, false, params(ContinuityPolicy::None));
        assert_eq!(out, vec![5.0]);
    }

    #[test]
    fn slew_decays_gauge_toward_zero() {
        let mut state = ContinuityState::new();
        let identity = vec![id(1)];
        apply_for_test(&mut state, &[0.0], &identity, 1, false, params(ContinuityPolicy::None));
        state.gauge_buf = vec![10.0];
        let first = apply_for_test(&mut state, &[0.0], &identity, 1, false, params(ContinuityPolicy::Slew));
        let second = apply_for_test(&mut state, &[0.0], &identity, 1, false, params(ContinuityPolicy::Slew));
        assert!(first[0] > second[0], "gauge should keep decaying toward zero");
        assert!(second[0] >= 0.0);
    }

    #[test]
    fn domain_change_preserves_the_visually_observed_value() {
        let mut state = ContinuityState::new();
        let first_identity = vec![id(1), id(2)];
        apply_for_test(&mut state, &[10.0, 20.0], &first_identity, 1, false, params(ContinuityPolicy::Slew));

        let second_identity = vec![id(2), id(3)];
        let out = apply_for_test(&mut state, &[1.0, 1.0], &second_identity, 1, true, params(ContinuityPolicy::Slew));
        assert!((out[0] - 20.0).abs() < 1e-4, "lane carried over by id should read its old effective value");
    }

    #[test]
    fn duplicate_identity_under_strict_policy_reports_a_diagnostic() {
        let mut state = ContinuityState::new();
        let identity = vec![id(1)];
        apply_for_test(&mut state, &[0.0], &identity, 1, false, params(ContinuityPolicy::None));

        let mut p = params(ContinuityPolicy::None);
        p.duplicate_policy = DuplicatePolicy::Strict;
        let mut sink = DiagnosticSink::new();
        let duplicate_identity = vec![id(2), id(2)];
        apply(&mut state, id(0), &[1.0, 2.0], &duplicate_identity, 1, true, p, &mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].kind, DiagnosticKind::DuplicateIdentity);
    }

    #[test]
    fn crossfade_converges_to_base_after_window() {
        let mut state = ContinuityState::new();
        let identity = vec![id(1)];
        apply_for_test(&mut state, &[0.0], &identity, 1, false, params(ContinuityPolicy::None));
        state.slew_buf = vec![100.0];
        state.prev_identity = identity.clone();

        let mut p = params(ContinuityPolicy::Crossfade);
        p.dt_s = 2.0;
        p.crossfade_window_s = 1.0;
        let out = apply_for_test(&mut state, &[0.0], &identity, 1, true, p);
        assert!((out[0] - 0.0).abs() < 1e-4, "fully elapsed crossfade should equal base");
    }
}
