//! Typed storage banks backing a [`crate::program::SlotTable`].
//!
//! Fixed-size, `Pod` rows via `bytemuck` for anything that crosses a
//! packed-layout boundary — here, the `shape2d` topology record, a packed
//! 8xu32 word array.

use bytemuck::{Pod, Zeroable};

use crate::program::{SlotKind, SlotTable};

/// Packed `shape2d` topology record: 8 little-endian `u32` words, meaning
/// assigned by the registry that wrote it. Only the wire layout is fixed
/// here, not the semantics of each word.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Shape2d {
    /// Raw packed words.
    pub words: [u32; 8],
}

const _: () = assert!(std::mem::size_of::<Shape2d>() == 32);

/// Per-frame mutable storage for every slot a [`CompiledProgram`] allocated.
///
/// [`CompiledProgram`]: crate::program::CompiledProgram
#[derive(Clone, Debug, Default)]
pub struct StorageBanks {
    /// `f32` lane storage.
    pub f32_bank: Vec<f32>,
    /// `i32` lane storage.
    pub i32_bank: Vec<i32>,
    /// `u32` lane storage.
    pub u32_bank: Vec<u32>,
    /// `shape2d` topology records.
    pub shape2d_bank: Vec<Shape2d>,
}

impl StorageBanks {
    /// Allocates zero-filled storage sized to `slots`'s bank lengths.
    #[must_use]
    pub fn sized_for(slots: &SlotTable) -> Self {
        Self {
            f32_bank: vec![0.0; slots.bank_len(SlotKind::F32) as usize],
            i32_bank: vec![0; slots.bank_len(SlotKind::I32) as usize],
            u32_bank: vec![0; slots.bank_len(SlotKind::U32) as usize],
            shape2d_bank: vec![Shape2d::zeroed(); slots.bank_len(SlotKind::Shape2d) as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_for_matches_bank_lengths() {
        let mut slots = SlotTable::new();
        slots.allocate(SlotKind::F32, 3);
        slots.allocate(SlotKind::Shape2d, 1);
        let banks = StorageBanks::sized_for(&slots);
        assert_eq!(banks.f32_bank.len(), 3);
        assert_eq!(banks.shape2d_bank.len(), 1);
    }
}
