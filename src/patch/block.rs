//! Block and port records: plain data records, no behavior attached —
//! behavior lives in the externally-supplied `BlockDef` (see
//! `crate::registry`).

use crate::ident::PortId;
use crate::types::{CanonicalType, CombineMode};

/// An ordered list of transformation references bound to a specific incoming
/// connection on an input port. Lens contents are resolved externally (by
/// the block registry); the compiler treats a lens chain as an opaque,
/// ordered list of symbol references it must thread through to lowering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LensChain {
    /// Ordered list of lens reference names.
    pub refs: Vec<String>,
}

/// A first-class input port, nested in its owning block.
#[derive(Clone, Debug)]
pub struct InputPort {
    /// Stable name within the block.
    pub id: String,
    /// Declared (possibly variable) type; refined in place by the solvers.
    pub ty: CanonicalType,
    /// Overrides the registry's default-source kind when no edge targets
    /// this port (pass 2). `None` means "use the registry default".
    pub default_source_override: Option<String>,
    /// Aggregation mode when more than one edge targets this port.
    pub combine_mode: Option<CombineMode>,
    /// Per-incoming-connection lens chains, indexed the same way edges are
    /// matched to this port (by stable edge sort key, not edge identity).
    pub lens_chains: Vec<LensChain>,
    /// `true` if this port is one of a zip-block's co-broadcast inputs — the
    /// cardinality solver groups these per owning block so an unresolved
    /// member can fall back to `one` instead of forcing the whole group's
    /// `many` domain onto it.
    pub zip_member: bool,
}

impl InputPort {
    /// Constructs an input port with no default override, no combine mode,
    /// and no lens chains — the common case for single-writer signal inputs.
    #[must_use]
    pub fn new(id: impl Into<String>, ty: CanonicalType) -> Self {
        Self {
            id: id.into(),
            ty,
            default_source_override: None,
            combine_mode: None,
            lens_chains: Vec::new(),
            zip_member: false,
        }
    }

    /// Constructs a zip-block broadcast-member input port; see
    /// [`InputPort::zip_member`].
    #[must_use]
    pub fn new_zip_member(id: impl Into<String>, ty: CanonicalType) -> Self {
        Self { zip_member: true, ..Self::new(id, ty) }
    }
}

/// A first-class output port, nested in its owning block.
#[derive(Clone, Debug)]
pub struct OutputPort {
    /// Stable name within the block.
    pub id: String,
    /// Declared (possibly variable) type; refined in place by the solvers.
    pub ty: CanonicalType,
}

impl OutputPort {
    /// Constructs an output port.
    #[must_use]
    pub const fn new_named(id: String, ty: CanonicalType) -> Self {
        Self { id, ty }
    }
}

/// A user-authored param value attached to a block (e.g. a waveform choice).
/// Opaque to the compiler; interpreted only by the block's `lower` routine.
#[derive(Clone, Debug)]
pub enum ParamValue {
    /// Floating-point literal.
    Float(f64),
    /// Integer literal.
    Int(i64),
    /// Boolean literal.
    Bool(bool),
    /// String literal (e.g. an enum choice like a waveform name).
    Str(String),
}

/// A node in the patch: identity, type tag, ordered ports, optional params.
#[derive(Clone, Debug)]
pub struct Block {
    /// Block type tag, looked up in the external block registry.
    pub type_tag: String,
    /// Ordered input ports (order is authoring-stable, used for diagnostics
    /// and for positional lens/combine bookkeeping).
    pub inputs: Vec<InputPort>,
    /// Ordered output ports.
    pub outputs: Vec<OutputPort>,
    /// User-authored parameters, keyed by name.
    pub params: Vec<(String, ParamValue)>,
}

impl Block {
    /// Constructs a block with no ports or params; callers push ports via
    /// `inputs`/`outputs` directly — no builder ceremony for data-only types.
    #[must_use]
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Index of the input port named `name`, if present.
    #[must_use]
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.id == name)
    }

    /// Index of the output port named `name`, if present.
    #[must_use]
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.id == name)
    }

    /// A param value by name, if present.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Resolves `port` against a block's current port lists, if the block still
/// has that many ports. Used by passes that hold a `PortId` (stable only
/// within the current `Patch` value) rather than a live reference.
#[must_use]
pub fn resolve_input<'a>(block: &'a Block, port: PortId) -> Option<&'a InputPort> {
    debug_assert!(port.is_input);
    block.inputs.get(port.index as usize)
}

/// Mutable counterpart of [`resolve_input`].
pub fn resolve_input_mut(block: &mut Block, port: PortId) -> Option<&mut InputPort> {
    debug_assert!(port.is_input);
    block.inputs.get_mut(port.index as usize)
}

/// Resolves an output port the same way [`resolve_input`] resolves an input.
#[must_use]
pub fn resolve_output<'a>(block: &'a Block, port: PortId) -> Option<&'a OutputPort> {
    debug_assert!(!port.is_input);
    block.outputs.get(port.index as usize)
}

/// Mutable counterpart of [`resolve_output`].
pub fn resolve_output_mut(block: &mut Block, port: PortId) -> Option<&mut OutputPort> {
    debug_assert!(!port.is_input);
    block.outputs.get_mut(port.index as usize)
}
