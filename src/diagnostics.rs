//! Diagnostics: data, never exceptions across layers.

use std::collections::VecDeque;

use crate::ident::{BlockId, PortId, TargetId};

/// Severity of a diagnostic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
    /// Compilation cannot produce a program.
    Fatal,
    /// Compilation cannot produce a program, same as `Fatal` but reported
    /// per-element rather than aborting the whole driver immediately.
    Error,
    /// Non-fatal; a program is still produced.
    Warn,
    /// Informational (e.g. an adapter was inserted).
    Info,
    /// Non-actionable hint.
    Hint,
}

impl Severity {
    /// `true` for `Fatal` and `Error`: either stops the driver outright
    /// (`Fatal`) or prevents a `CompiledProgram` from being emitted at the
    /// end of the pass pipeline (`Error`).
    #[must_use]
    pub const fn blocks_compile(self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }
}

/// A reference to the graph element a diagnostic is about.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetRef {
    /// The whole patch (e.g. a structural invariant violation).
    Patch,
    /// A specific block.
    Block(BlockId),
    /// A specific port on a block.
    Port(PortId),
    /// A continuity target, identified at runtime rather than compile time.
    Target(TargetId),
}

/// The kind of condition a diagnostic reports. Non-exhaustive: new
/// compile-time kinds may be added without a breaking change, but the
/// runtime kinds are fixed (the executor has no pass structure to extend).
#[derive(Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum DiagnosticKind {
    /// A payload/cardinality/unit variable was never resolved to a concrete value.
    UnresolvedPayload,
    /// See above, for cardinality.
    UnresolvedCardinality,
    /// See above, for unit.
    UnresolvedUnit,
    /// A union-find root was forced to two different concrete payloads.
    ConflictingPayloads,
    /// A union-find root was forced to two different concrete cardinalities.
    ConflictingCardinalities,
    /// A union-find root was forced to two different concrete units.
    ConflictingUnits,
    /// Edge endpoints differ and no adapter exists for the pair.
    NoConversionPath,
    /// Combine mode disallowed for the port's payload.
    InvalidCombineMode,
    /// A dependency cycle closes without crossing a stateful block.
    CycleWithoutState,
    /// An unconnected input whose registry entry forbids defaults.
    MissingRequiredInput,
    /// A payload-generic block rejected a concrete payload.
    PayloadNotAllowed,
    /// A payload-generic block rejected a combination of concrete payloads.
    PayloadCombinationNotAllowed,
    /// Two stateful blocks declared the same `StateId`.
    DuplicateStateId,
    /// Two lanes in one identity vector carry the same id.
    DuplicateIdentity,
    /// The signal evaluator and field materializer disagree on an opcode.
    OpcodeCoverageMismatch,
    /// A per-particle shape slot was referenced; not implemented end-to-end.
    /// Must raise, never silently fall back.
    NotImplemented,
    /// An adapter block was inserted on an edge (always `Info`).
    AdapterInserted,
}

/// A single diagnostic: kind, severity, target, and a human-readable message.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// What condition this reports.
    pub kind: DiagnosticKind,
    /// How severe it is.
    pub severity: Severity,
    /// The graph element it's about.
    pub target: TargetRef,
    /// Human-readable explanation.
    pub message: String,
}

impl Diagnostic {
    /// Constructs a diagnostic.
    #[must_use]
    pub fn new(kind: DiagnosticKind, severity: Severity, target: TargetRef, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            target,
            message: message.into(),
        }
    }
}

/// Accumulates diagnostics during a single compile. Diagnostics accumulate,
/// and the driver only checks
/// for a blocking severity once the whole pipeline run (or the current
/// pass) has finished appending.
#[derive(Default, Debug)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a diagnostic.
    pub fn push(&mut self, d: Diagnostic) {
        self.entries.push(d);
    }

    /// `true` if any accumulated diagnostic blocks compilation.
    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.entries.iter().any(|d| d.severity.blocks_compile())
    }

    /// Total number of diagnostics accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no diagnostics have been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All accumulated diagnostics, in emission order.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Drains the sink, returning its contents.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}

/// Append-only diagnostic log with a bounded ring buffer: append-only from
/// any producer, with a bounded log ring (eviction FIFO at a declared cap).
/// Unlike `DiagnosticSink`, which
/// is scoped to a single compile, the hub is engine-instance-scoped and
/// accumulates diagnostics across compiles and frames.
#[derive(Debug)]
pub struct DiagnosticHub {
    cap: usize,
    ring: VecDeque<Diagnostic>,
}

impl DiagnosticHub {
    /// Creates a hub that retains at most `cap` most-recent diagnostics.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            ring: VecDeque::new(),
        }
    }

    /// Appends a diagnostic, evicting the oldest entry if at capacity.
    pub fn push(&mut self, d: Diagnostic) {
        if self.ring.len() >= self.cap {
            self.ring.pop_front();
        }
        self.ring.push_back(d);
    }

    /// Appends all diagnostics from a sink, in order.
    pub fn extend_from_sink(&mut self, sink: &mut DiagnosticSink) {
        for d in sink.drain() {
            self.push(d);
        }
    }

    /// A read-only snapshot of the current ring contents, oldest first.
    ///
    /// The only state shared read-only with consumers outside the tick; the
    /// snapshot is a plain owned `Vec` so
    /// callers cannot observe future mutation.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.ring.iter().cloned().collect()
    }

    /// Number of diagnostics currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// `true` if the hub currently holds no diagnostics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_evicts_oldest_at_capacity() {
        let mut hub = DiagnosticHub::new(2);
        for i in 0..3u32 {
            hub.push(Diagnostic::new(
                DiagnosticKind::AdapterInserted,
                Severity::Info,
                TargetRef::Patch,
                format!("entry {i}"),
            ));
        }
        let snap = hub.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].message, "entry 1");
        assert_eq!(snap[1].message, "entry 2");
    }

    #[test]
    fn sink_blocking_detection() {
        let mut sink = DiagnosticSink::new();
        assert!(!sink.has_blocking());
        sink.push(Diagnostic::new(
            DiagnosticKind::UnresolvedUnit,
            Severity::Warn,
            TargetRef::Patch,
            "not fatal",
        ));
        assert!(!sink.has_blocking());
        sink.push(Diagnostic::new(
            DiagnosticKind::UnresolvedUnit,
            Severity::Error,
            TargetRef::Patch,
            "fatal",
        ));
        assert!(sink.has_blocking());
    }
}
