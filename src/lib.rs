// SPDX-License-Identifier: Apache-2.0
//! patchgraph-core: compile-and-execute core for a node-graph animation engine.
//!
//! A [`patch::graph::Patch`] (the user-authored node graph) is compiled by
//! [`compiler::compile`] against a [`registry::BlockRegistry`] into a
//! [`program::CompiledProgram`] — a flat, schedule-ordered sequence of
//! [`program::Step`]s over pre-allocated [`program::SlotTable`] storage. A
//! [`runtime::RuntimeState`] then ticks that program frame by frame,
//! producing [`runtime::TickOutput`] (fired events and collected render
//! passes). [`hotswap::swap`] migrates a running [`runtime::RuntimeState`]
//! across a recompile without a visible discontinuity.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Multi-pass compiler: patch graph in, compiled program out.
pub mod compiler;
/// Frame-to-frame continuity: smooths a discontinuous lane remap across a
/// domain-cardinality change or a hot swap.
pub mod continuity;
/// Compile-time diagnostics: severities, findings, and the shared sink.
pub mod diagnostics;
/// Scalar/field evaluation: opcodes, signal kernels, and field kernels.
pub mod eval;
/// Hot-swap driver: migrates a running program across a recompile.
pub mod hotswap;
/// Identifier and hashing utilities.
pub mod ident;
/// Hash-consed intermediate representation for scalar and field expressions.
pub mod ir;
/// Hash-consed field materializer and its buffer pool.
pub mod materializer;
/// Patch data model: blocks, ports, edges.
pub mod patch;
/// Compiled program representation: slots, steps, schedule.
pub mod program;
/// Block registry: the external collaborator that supplies block behavior.
pub mod registry;
/// Render-pass collection and draw-op assembly.
pub mod render;
/// Two-phase tick executor and its storage banks.
pub mod runtime;
/// Canonical value types: payload kind, unit, extent, combine mode.
pub mod types;

/// Telemetry sink trait and its feature-gated JSONL emitter.
pub mod telemetry;

// Re-exports for stable public API
/// Compiler entry point and its error/option types.
pub use compiler::{compile, compile_with_telemetry, CompileError, CompileOptions};
/// Continuity policy, params, state, and the lane mapping it runs against.
pub use continuity::{
    apply as apply_continuity, build_lane_mapping, ContinuityParams, ContinuityPolicy, ContinuityState, ContinuityStore, DuplicatePolicy,
    IdentityMode, LaneMapping,
};
/// Diagnostic severities, findings, and the shared accumulator.
pub use diagnostics::{Diagnostic, DiagnosticHub, DiagnosticKind, DiagnosticSink, Severity, TargetRef};
/// Opcode arity checking and the built-in signal/field kernels.
pub use eval::{combine, noise1d, smoothstep, step, Arity, ArityError, Easing, FieldKernel, Opcode, Waveform};
/// Hot-swap driver types.
pub use hotswap::{swap, swap_with_telemetry, Revisioned, SwapResult};
/// Compiler-local and content-addressed identifier types.
pub use ident::{make_state_id, make_target_id, BlockId, EdgeId, ExprId, Hash, InstanceId, PortId, SlotId, StateId, Symbol, SymbolTable, TargetId};
/// Hash-consed IR expression types.
pub use ir::{ConstValue, ExprBuilder, ExprData, FieldExpr, FieldIntrinsic, ValueExpr};
/// Field materializer cache and its buffer pool.
pub use materializer::{BufferPool, FieldCache};
/// Patch data model types.
pub use patch::{Block, Edge, InputPort, LensChain, OutputPort, ParamValue, Patch, PatchInvariantError};
/// Compiled program representation.
pub use program::{CompiledProgram, LaneCounts, Phase, SlotKind, SlotLayout, SlotTable, Step};
/// Block registry and block definition types.
pub use registry::{BlockDef, BlockRegistry, LowerError, LowerFn, PortSpec, TimeTopology, UnknownBlockType};
/// Render-pass collection and draw-op assembly.
pub use render::{declared_points_count, DrawInput, DrawOp, IndexPool, RenderAssembler};
/// Two-phase executor and its outputs.
pub use runtime::{CollectedRenderPass, FiredEvents, MigrationOutcome, RuntimeError, RuntimeState, StateStore, TickOutput};
/// Typed storage banks backing a compiled program's slots.
pub use runtime::banks::{Shape2d, StorageBanks};
/// Telemetry sink trait and the default no-op sink.
pub use telemetry::{NullTelemetrySink, TelemetrySink};
#[cfg(feature = "telemetry")]
/// JSONL telemetry sink, available with the `telemetry` feature.
pub use telemetry::JsonlTelemetrySink;
/// Canonical value types.
pub use types::{CanonicalType, CombineMode, Extent, Payload, PayloadKind, Unit};
