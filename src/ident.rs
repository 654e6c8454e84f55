//! Identifier and hashing utilities.
//!
//! Compiler-local identifiers (`BlockId`, `PortId`, `SlotId`, ...) are plain
//! monotonic handles scoped to a single compilation; cross-compile-stable
//! identifiers (`StateId`, `TargetId`) and structurally-shared identifiers
//! (`ExprId`) are content-addressed: a domain-separated BLAKE3 hash, wrapped
//! in a `#[repr(transparent)]` newtype so the various id spaces can never be
//! confused with one another.

use blake3::Hasher;

/// Canonical 256-bit hash used for content-addressed identifiers.
pub type Hash = [u8; 32];

macro_rules! hash_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub Hash);

        impl $name {
            /// Returns the canonical byte representation of this id.
            #[must_use]
            pub const fn as_bytes(&self) -> &Hash {
                &self.0
            }
        }
    };
}

hash_newtype!(
    ExprId,
    "Hash-consed identifier for an IR expression subtree. Identical subtrees \
     across a whole compilation share the same id."
);
hash_newtype!(
    StateId,
    "Stable identifier for a stateful block's state, surviving recompiles."
);
hash_newtype!(
    TargetId,
    "Stable identifier for a continuity target, surviving recompiles."
);

/// Compiler-local identifier for a block in a patch.
///
/// Scoped to a single `Patch` value; not content-addressed, since blocks are
/// identified positionally by the authoring layer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(pub u32);

/// Compiler-local identifier for a port on a block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PortId {
    /// Owning block.
    pub block: BlockId,
    /// Port's index within the block's ordered port map.
    pub index: u16,
    /// `true` for an input port, `false` for an output port.
    pub is_input: bool,
}

/// Compiler-local identifier for an edge in a patch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EdgeId(pub u32);

/// Stable identifier for an instance domain (lane set).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstanceId(pub u32);

/// Numbered storage location assigned by the slot planner.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SlotId(pub u32);

/// Interned symbol for block type tags, port ids, and other short strings
/// that recur across a compilation. Interning avoids repeated string
/// comparison/hashing on the hot compiler paths (cardinality/unit solving
/// touch every port).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Symbol(u32);

/// Arena-backed string interner.
///
/// Stable identity derived from content, but interns process-local
/// strings rather than cross-process hashes, since symbols never leave a
/// single compilation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    strings: Vec<Box<str>>,
    lookup: rustc_hash::FxHashMap<Box<str>, Symbol>,
}

impl SymbolTable {
    /// Creates an empty symbol table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning a stable `Symbol` for it.
    ///
    /// Repeated calls with equal strings return the same `Symbol`.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(s) {
            return sym;
        }
        let sym = Symbol(
            u32::try_from(self.strings.len()).unwrap_or_else(|_| {
                debug_assert!(false, "symbol table overflowed u32 capacity");
                u32::MAX
            }),
        );
        self.strings.push(s.into());
        self.lookup.insert(s.into(), sym);
        sym
    }

    /// Resolves a previously interned symbol back to its string.
    #[must_use]
    pub fn resolve(&self, sym: Symbol) -> &str {
        self.strings
            .get(sym.0 as usize)
            .map_or("<invalid-symbol>", std::convert::AsRef::as_ref)
    }
}

/// Produces a stable, domain-separated `StateId` (prefix `b"state:"`).
#[must_use]
pub fn make_state_id(label: &str) -> StateId {
    domain_hash(b"state:", label.as_bytes()).into_state_id()
}

/// Produces a stable, domain-separated `TargetId` (prefix `b"target:"`).
#[must_use]
pub fn make_target_id(label: &str) -> TargetId {
    domain_hash(b"target:", label.as_bytes()).into_target_id()
}

fn domain_hash(prefix: &[u8], body: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(prefix);
    hasher.update(body);
    hasher.finalize().into()
}

trait IntoIds {
    fn into_state_id(self) -> StateId;
    fn into_target_id(self) -> TargetId;
}

impl IntoIds for Hash {
    fn into_state_id(self) -> StateId {
        StateId(self)
    }
    fn into_target_id(self) -> TargetId {
        TargetId(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_prevents_cross_kind_collisions() {
        let lbl = "osc1.phase";
        assert_ne!(make_state_id(lbl).0, make_target_id(lbl).0);
    }

    #[test]
    fn symbol_interning_is_stable() {
        let mut t = SymbolTable::new();
        let a = t.intern("Oscillator");
        let b = t.intern("Adder");
        let a2 = t.intern("Oscillator");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(t.resolve(a), "Oscillator");
        assert_eq!(t.resolve(b), "Adder");
    }
}
