//! Feature-gated JSONL telemetry: lifecycle events (`CompileBegin`,
//! `CompileEnd`, `ProgramSwapped`), per-pass trace events, and per-frame
//! executor events. Manually formatted, not run through a serializer, so a
//! determinism-sensitive path never depends on a map's iteration order.
//!
//! [`TelemetrySink`] is a plain trait so the core never hard-codes where
//! events go; [`NullTelemetrySink`] is the default and costs nothing when
//! the `telemetry` feature is off.

use crate::ident::Hash;

/// Receives lifecycle and trace events. Implementations decide where events
/// go (stdout, a file, a channel); the core only ever calls through this
/// trait, never the concrete sink.
pub trait TelemetrySink {
    /// A compilation started for `patch_id` at `patch_revision`.
    fn compile_begin(&self, patch_id: u64, patch_revision: u64);
    /// A compilation finished, successfully or not.
    fn compile_end(&self, patch_id: u64, patch_revision: u64, diagnostics_count: usize, success: bool);
    /// A compiler pass finished; `diagnostics_count` is the running total
    /// accumulated so far, not just this pass's contribution.
    fn pass_trace(&self, pass_name: &str, diagnostics_count: usize);
    /// A hot swap replaced the running program.
    fn program_swapped(&self, from_rev: u64, to_rev: u64, fingerprint: &Hash);
    /// One frame executed.
    fn frame_tick(&self, frame_stamp: u64, steps_executed: usize, cache_hits: u64, cache_evictions: u64);
}

/// Discards every event. The default sink; keeps the core's hot paths free
/// of I/O when telemetry isn't wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn compile_begin(&self, _patch_id: u64, _patch_revision: u64) {}
    fn compile_end(&self, _patch_id: u64, _patch_revision: u64, _diagnostics_count: usize, _success: bool) {}
    fn pass_trace(&self, _pass_name: &str, _diagnostics_count: usize) {}
    fn program_swapped(&self, _from_rev: u64, _to_rev: u64, _fingerprint: &Hash) {}
    fn frame_tick(&self, _frame_stamp: u64, _steps_executed: usize, _cache_hits: u64, _cache_evictions: u64) {}
}

#[cfg(feature = "telemetry")]
fn short_hash(h: &Hash) -> String {
    hex::encode(&h[0..8])
}

#[cfg(feature = "telemetry")]
fn ts_micros() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros()
}

/// Writes one JSON object per line to stdout. Best-effort: a write failure
/// is dropped rather than propagated, since losing a telemetry line must
/// never affect compilation or execution.
#[cfg(feature = "telemetry")]
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonlTelemetrySink;

#[cfg(feature = "telemetry")]
impl JsonlTelemetrySink {
    fn emit(&self, line: &str) {
        use std::io::Write as _;
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.write_all(b"\n");
    }
}

#[cfg(feature = "telemetry")]
impl TelemetrySink for JsonlTelemetrySink {
    fn compile_begin(&self, patch_id: u64, patch_revision: u64) {
        self.emit(&format!(
            r#"{{"timestamp_micros":{},"event":"CompileBegin","patch_id":{patch_id},"patch_revision":{patch_revision}}}"#,
            ts_micros()
        ));
    }

    fn compile_end(&self, patch_id: u64, patch_revision: u64, diagnostics_count: usize, success: bool) {
        self.emit(&format!(
            r#"{{"timestamp_micros":{},"event":"CompileEnd","patch_id":{patch_id},"patch_revision":{patch_revision},"diagnostics_count":{diagnostics_count},"success":{success}}}"#,
            ts_micros()
        ));
    }

    fn pass_trace(&self, pass_name: &str, diagnostics_count: usize) {
        self.emit(&format!(
            r#"{{"timestamp_micros":{},"event":"PassTrace","pass":"{pass_name}","diagnostics_count":{diagnostics_count}}}"#,
            ts_micros()
        ));
    }

    fn program_swapped(&self, from_rev: u64, to_rev: u64, fingerprint: &Hash) {
        self.emit(&format!(
            r#"{{"timestamp_micros":{},"event":"ProgramSwapped","from_rev":{from_rev},"to_rev":{to_rev},"fingerprint":"{}"}}"#,
            ts_micros(),
            short_hash(fingerprint)
        ));
    }

    fn frame_tick(&self, frame_stamp: u64, steps_executed: usize, cache_hits: u64, cache_evictions: u64) {
        self.emit(&format!(
            r#"{{"timestamp_micros":{},"event":"FrameTick","frame_stamp":{frame_stamp},"steps_executed":{steps_executed},"cache_hits":{cache_hits},"cache_evictions":{cache_evictions}}}"#,
            ts_micros()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_every_call_without_panicking() {
        let sink = NullTelemetrySink;
        sink.compile_begin(1, 1);
        sink.compile_end(1, 1, 0, true);
        sink.pass_trace("cycles", 0);
        sink.program_swapped(1, 2, &[0u8; 32]);
        sink.frame_tick(0, 4, 1, 0);
    }
}
