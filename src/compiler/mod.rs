//! Multi-pass compiler: turns a [`crate::patch::graph::Patch`] plus
//! a [`crate::registry::BlockRegistry`] into a [`crate::program::CompiledProgram`].
//!
//! Passes run in a fixed numbered order. Each pass accumulates diagnostics
//! into one shared [`DiagnosticSink`]; the driver checks for a blocking
//! severity after every pass and stops early: a later pass never
//! runs against a graph a diagnostic already condemned.

pub mod adapters;
pub mod cardinality;
pub mod cycles;
pub mod defaults;
pub mod lowering;
pub mod payload;
pub mod schedule;
pub mod slots;
pub mod time_topology;
pub mod type_check;
pub mod units;
pub mod union_find;

use crate::diagnostics::DiagnosticSink;
use crate::patch::graph::{Patch, PatchInvariantError};
use crate::program::CompiledProgram;
use crate::registry::{BlockRegistry, LowerError};
use crate::telemetry::TelemetrySink;

/// Fatal compiler error: distinct from diagnostics, which are recoverable
/// per-element findings. A `CompileError` means the driver could not even
/// attempt to produce a schedule.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The input patch violated one or more structural invariants before any
    /// solver ran.
    #[error("patch has {} structural invariant violation(s)", .0.len())]
    InvalidPatch(Vec<PatchInvariantError>),
    /// Diagnostics accumulated during the pass pipeline include at least one
    /// blocking entry; no program was produced.
    #[error("compilation failed with {blocking} blocking diagnostic(s) of {total} total")]
    Diagnosed {
        /// Blocking diagnostic count.
        blocking: usize,
        /// Total diagnostic count (blocking and non-blocking).
        total: usize,
    },
    /// A block's own lowering routine failed (pass 9).
    #[error(transparent)]
    Lowering(#[from] LowerError),
}

/// Options controlling a single compilation. Plain struct, no builder
/// ceremony — direct field construction over a fluent builder, since this
/// type has no invariants to protect.
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Maximum number of adapters pass 3 may insert on a single edge before
    /// giving up and raising `NoConversionPath` (guards against an adapter
    /// registry with a pathological conversion graph).
    pub max_adapter_chain: u32,
    /// Opaque identifier of the patch being compiled, carried through only
    /// for telemetry's `CompileBegin`/`CompileEnd` events.
    pub patch_id: u64,
    /// Monotonically increasing revision of the patch being compiled, same
    /// purpose as `patch_id`.
    pub patch_revision: u64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_adapter_chain: 4,
            patch_id: 0,
            patch_revision: 0,
        }
    }
}

/// Compiles `patch` against `registry`, returning the compiled program and
/// every diagnostic accumulated along the way (even on success: `Warn`/`Info`
/// findings never block compilation but are still worth surfacing).
pub fn compile(patch: &mut Patch, registry: &BlockRegistry, options: CompileOptions) -> Result<(CompiledProgram, DiagnosticSink), CompileError> {
    compile_with_telemetry(patch, registry, options, &crate::telemetry::NullTelemetrySink)
}

/// Same as [`compile`], reporting lifecycle and per-pass events to `sink`.
pub fn compile_with_telemetry(
    patch: &mut Patch,
    registry: &BlockRegistry,
    options: CompileOptions,
    sink: &dyn TelemetrySink,
) -> Result<(CompiledProgram, DiagnosticSink), CompileError> {
    sink.compile_begin(options.patch_id, options.patch_revision);

    let result = (|| {
        patch.check_invariants().map_err(CompileError::InvalidPatch)?;

        let mut diagnostics = DiagnosticSink::new();
        let mut symbols = crate::ident::SymbolTable::new();

        payload::resolve_payloads(patch, registry, &mut diagnostics);
        sink.pass_trace("payload", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        defaults::materialize_defaults(patch, registry, &mut diagnostics);
        sink.pass_trace("defaults", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        adapters::insert_adapters(patch, registry, options, &mut diagnostics);
        sink.pass_trace("adapters", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        cardinality::solve_cardinality(patch, registry, &mut diagnostics);
        sink.pass_trace("cardinality", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        units::solve_units(patch, registry, options, &mut diagnostics);
        sink.pass_trace("units", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        type_check::validate_types(patch, registry, &mut diagnostics);
        sink.pass_trace("type_check", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        let topology = time_topology::assign_time_topology(patch, registry, &mut diagnostics);
        sink.pass_trace("time_topology", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        let order = cycles::check_cycles(patch, &topology, &mut diagnostics);
        sink.pass_trace("cycles", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        let lowered = lowering::lower_patch(patch, registry, &order, &mut symbols, &mut diagnostics)?;
        sink.pass_trace("lowering", diagnostics.len());
        bail_if_blocked(&diagnostics)?;

        let scheduled = schedule::build_schedule(lowered);
        let program = slots::finalize_program(scheduled);

        Ok((program, diagnostics))
    })();

    let (diagnostics_count, success) = match &result {
        Ok((_, diagnostics)) => (diagnostics.len(), true),
        Err(CompileError::Diagnosed { total, .. }) => (*total, false),
        Err(_) => (0, false),
    };
    sink.compile_end(options.patch_id, options.patch_revision, diagnostics_count, success);

    result
}

fn bail_if_blocked(diagnostics: &DiagnosticSink) -> Result<(), CompileError> {
    if diagnostics.has_blocking() {
        let blocking = diagnostics.entries().iter().filter(|d| d.severity.blocks_compile()).count();
        Err(CompileError::Diagnosed {
            blocking,
            total: diagnostics.len(),
        })
    } else {
        Ok(())
    }
}
