//! Block registry: the external collaborator that supplies block behavior.
//! The compiler only requires a trait/interface seam; what populates the
//! registry is out of scope here.
//!
//! Static metadata plus fn-pointer hooks, registered once at startup and
//! looked up by a stable string key: a block type tag and its [`LowerFn`].
//! The compiler never branches on a block's identity, only on the metadata
//! and hooks its `BlockDef` exposes — the engine driving compilation stays
//! separate from the data describing one block.

use rustc_hash::FxHashMap;

use crate::patch::block::Block;
use crate::types::{CanonicalType, CombineMode};

/// How a block participates in time topology assignment (compiler pass 7).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimeTopology {
    /// Pure function of its current-frame inputs; never breaks a cycle.
    Stateless,
    /// Reads previous-frame state in Phase 1, writes new state in Phase 2.
    /// A dependency cycle is only valid if it crosses at least one stateful
    /// block.
    Stateful,
    /// Produces discrete events rather than a continuous signal/field.
    EventSource,
    /// Terminal: contributes to render-pass collection, produces no
    /// downstream-visible output port.
    RenderSink,
}

/// Static description of one of a block's ports, as declared by the block's
/// author (not the per-instance `InputPort`/`OutputPort` records the patch
/// graph stores — those are refined copies seeded from this).
#[derive(Clone, Debug)]
pub struct PortSpec {
    /// Stable port name.
    pub name: &'static str,
    /// The port's declared type (may contain `Variable` components, refined
    /// by the solver passes).
    pub ty: CanonicalType,
    /// Default combine mode for a multi-writer input; `None` for outputs and
    /// for inputs that don't accept multiple writers.
    pub default_combine_mode: Option<CombineMode>,
    /// Type tag of the default-source block to instantiate when this input
    /// has no incoming edge (compiler pass 2); `None` if the input has no
    /// registry-supplied default and must always be connected.
    pub default_source: Option<&'static str>,
    /// `true` for one of a zip-block's co-broadcast inputs; mirrors
    /// `patch::block::InputPort::zip_member` on the instantiated instance.
    pub zip_member: bool,
}

impl PortSpec {
    /// Convenience constructor for a required input/output with no default
    /// source and no combine mode (the common case for a strictly-typed,
    /// single-writer port).
    #[must_use]
    pub const fn plain(name: &'static str, ty: CanonicalType) -> Self {
        Self {
            name,
            ty,
            default_combine_mode: None,
            default_source: None,
            zip_member: false,
        }
    }

    /// Convenience constructor for one of a zip-block's broadcast-member
    /// inputs.
    #[must_use]
    pub const fn zip_member(name: &'static str, ty: CanonicalType) -> Self {
        Self {
            name,
            ty,
            default_combine_mode: None,
            default_source: None,
            zip_member: true,
        }
    }
}

/// Error produced when lowering a block fails for a reason specific to that
/// block's own logic (malformed params, an unsupported param combination).
/// Distinct from the generic compiler-pass errors in `crate::compiler`,
/// which never need to know why a block's own lowering routine failed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("block '{block_type}' failed to lower: {reason}")]
pub struct LowerError {
    /// The block type tag that failed.
    pub block_type: String,
    /// Human-readable reason.
    pub reason: String,
}

impl LowerError {
    /// Constructs a lowering error for `block_type`.
    #[must_use]
    pub fn new(block_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            reason: reason.into(),
        }
    }
}

/// Function pointer that lowers one block instance into IR expressions, slot
/// allocations, and schedule steps via the supplied lowering context.
///
/// Mirrors `rule.rs`'s `ExecuteFn`: a plain fn pointer (not a trait object),
/// since block kinds are a closed, registration-time set and dynamic dispatch
/// buys nothing a match on a string key doesn't already give.
pub type LowerFn = for<'a> fn(&mut crate::compiler::lowering::LowerCtx<'a>, &Block, crate::ident::BlockId) -> Result<(), LowerError>;

/// Static metadata and behavior for one block kind.
pub struct BlockDef {
    /// Stable type tag, matched against `Block::type_tag`.
    pub type_tag: &'static str,
    /// Declared input ports, in authoring order.
    pub inputs: &'static [PortSpec],
    /// Declared output ports, in authoring order.
    pub outputs: &'static [PortSpec],
    /// This block's role in time topology assignment.
    pub time_topology: TimeTopology,
    /// Builds a fresh, fully-ported instance of this block kind with default
    /// params. Used by default-source materialization (pass 2) to splice in
    /// a block for an unconnected input with a registry-declared default,
    /// and available to authoring tools that want a template instance.
    pub instantiate: fn() -> Block,
    /// Lowering hook.
    pub lower: LowerFn,
}

impl core::fmt::Debug for BlockDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockDef")
            .field("type_tag", &self.type_tag)
            .field("time_topology", &self.time_topology)
            .finish_non_exhaustive()
    }
}

/// Error raised when a patch references an unregistered block type.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown block type '{0}'")]
pub struct UnknownBlockType(pub String);

/// Registry of known block kinds, keyed by type tag.
///
/// Built once (typically at process startup from a `static` table of
/// `BlockDef`s) and handed to the compiler by reference for the duration of
/// one compilation; never mutated mid-compile.
#[derive(Default)]
pub struct BlockRegistry {
    defs: FxHashMap<&'static str, &'static BlockDef>,
}

impl BlockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block definition. Later registrations with the same type
    /// tag replace earlier ones.
    pub fn register(&mut self, def: &'static BlockDef) {
        self.defs.insert(def.type_tag, def);
    }

    /// Looks up a block definition by type tag.
    pub fn lookup(&self, type_tag: &str) -> Result<&'static BlockDef, UnknownBlockType> {
        self.defs.get(type_tag).copied().ok_or_else(|| UnknownBlockType(type_tag.to_owned()))
    }

    /// Number of registered block kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// `true` if no block kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Iterates every registered definition in ascending type-tag order
    /// (deterministic, independent of registration order).
    pub fn iter_sorted(&self) -> impl Iterator<Item = &'static BlockDef> + '_ {
        let mut tags: Vec<&'static str> = self.defs.keys().copied().collect();
        tags.sort_unstable();
        tags.into_iter().map(move |t| self.defs[t])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::BlockId;
    use crate::types::{Extent, PayloadKind, Unit};

    fn noop_lower(_ctx: &mut crate::compiler::lowering::LowerCtx<'_>, _block: &Block, _id: BlockId) -> Result<(), LowerError> {
        Ok(())
    }

    fn instantiate_adder() -> Block {
        Block::new("Adder")
    }

    static ADDER: BlockDef = BlockDef {
        type_tag: "Adder",
        inputs: &[PortSpec::plain("a", CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One))],
        outputs: &[PortSpec::plain("out", CanonicalType::concrete(PayloadKind::Float, Unit::Scalar, Extent::One))],
        time_topology: TimeTopology::Stateless,
        instantiate: instantiate_adder,
        lower: noop_lower,
    };

    #[test]
    fn lookup_round_trips() {
        let mut reg = BlockRegistry::new();
        reg.register(&ADDER);
        assert_eq!(reg.lookup("Adder").unwrap().type_tag, "Adder");
        assert!(reg.lookup("Nope").is_err());
    }

    #[test]
    fn later_registration_replaces_earlier() {
        static ADDER_V2: BlockDef = BlockDef {
            type_tag: "Adder",
            inputs: &[],
            outputs: &[],
            time_topology: TimeTopology::Stateless,
            instantiate: instantiate_adder,
            lower: noop_lower,
        };
        let mut reg = BlockRegistry::new();
        reg.register(&ADDER);
        reg.register(&ADDER_V2);
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup("Adder").unwrap().inputs.is_empty());
    }
}
