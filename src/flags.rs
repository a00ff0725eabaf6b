//! Packed role assignment of the triple buffer
//!
//! The whole state of the synchronization protocol fits in one byte:
//!
//! ```text
//!   bit   7    6      5 4     3 2     1 0
//!      (unused) new  dirty   clean   snap
//! ```
//!
//! The three 2-bit indices always form a permutation of {0, 1, 2}, which is
//! what guarantees that the writer, the reader and the handoff slot never
//! alias each other. Every transition below maps a valid word to a valid word,
//! and the atomic word is only ever modified through these transitions.

use std::fmt;

/// Raw storage of a flag word
pub(crate) type RawFlags = u8;

/// Atomic counterpart of RawFlags
pub(crate) type AtomicFlags = std::sync::atomic::AtomicU8;

/// Index of one of the three slots (0, 1 or 2)
pub(crate) type SlotIndex = usize;

const SNAP_SHIFT: u32 = 0;
const CLEAN_SHIFT: u32 = 2;
const DIRTY_SHIFT: u32 = 4;

const INDEX_MASK: RawFlags = 0b11;
const SNAP_MASK: RawFlags = INDEX_MASK << SNAP_SHIFT;
const CLEAN_MASK: RawFlags = INDEX_MASK << CLEAN_SHIFT;
const DIRTY_MASK: RawFlags = INDEX_MASK << DIRTY_SHIFT;
const NEW_WRITE_BIT: RawFlags = 0b0100_0000;
const RESERVED_BIT: RawFlags = 0b1000_0000;

/// Decoded view of the flag word
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlagWord(RawFlags);
//
impl FlagWord {
    /// Starting state: dirty = 0, clean = 1, snap = 2, nothing published
    pub const INITIAL: Self = Self((1 << CLEAN_SHIFT) | (2 << SNAP_SHIFT));

    /// Interpret a raw byte loaded from the atomic word
    #[inline]
    pub const fn from_raw(raw: RawFlags) -> Self {
        Self(raw)
    }

    /// Raw byte to be stored into the atomic word
    #[inline]
    pub const fn into_raw(self) -> RawFlags {
        self.0
    }

    /// Slot currently exposed to the reader
    #[inline]
    pub const fn snap_index(self) -> SlotIndex {
        ((self.0 & SNAP_MASK) >> SNAP_SHIFT) as SlotIndex
    }

    /// Slot holding the latest published value
    #[inline]
    pub const fn clean_index(self) -> SlotIndex {
        ((self.0 & CLEAN_MASK) >> CLEAN_SHIFT) as SlotIndex
    }

    /// Slot the writer is currently filling
    #[inline]
    pub const fn dirty_index(self) -> SlotIndex {
        ((self.0 & DIRTY_MASK) >> DIRTY_SHIFT) as SlotIndex
    }

    /// Truth that the writer published something since the last claim
    #[inline]
    pub const fn is_new_write(self) -> bool {
        self.0 & NEW_WRITE_BIT != 0
    }

    /// Writer transition: mark a new write and swap the clean and dirty roles
    ///
    /// The freshly written dirty slot becomes the clean slot, and the writer
    /// gets the previous clean slot to write into next. If that previous clean
    /// slot was never claimed, its value is lost, which is how the buffer only
    /// ever keeps the latest value around.
    #[inline]
    pub const fn publish(self) -> Self {
        let old = self.0;
        Self(
            NEW_WRITE_BIT
                | ((old & CLEAN_MASK) << (DIRTY_SHIFT - CLEAN_SHIFT))
                | ((old & DIRTY_MASK) >> (DIRTY_SHIFT - CLEAN_SHIFT))
                | (old & SNAP_MASK),
        )
    }

    /// Reader transition: swap the snap and clean roles, clearing new write
    ///
    /// Only meaningful if `is_new_write()` is true, otherwise the reader would
    /// go back to an older value.
    #[inline]
    pub const fn claim(self) -> Self {
        let old = self.0;
        Self(
            (old & DIRTY_MASK)
                | ((old & SNAP_MASK) << (CLEAN_SHIFT - SNAP_SHIFT))
                | ((old & CLEAN_MASK) >> (CLEAN_SHIFT - SNAP_SHIFT)),
        )
    }

    /// Check that the three roles partition the three slots
    pub const fn is_partition(self) -> bool {
        let (s, c, d) = (self.snap_index(), self.clean_index(), self.dirty_index());
        (self.0 & RESERVED_BIT == 0)
            && (s < 3)
            && (c < 3)
            && (d < 3)
            && (s != c)
            && (c != d)
            && (s != d)
    }
}
//
impl fmt::Debug for FlagWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagWord")
            .field("snap", &self.snap_index())
            .field("clean", &self.clean_index())
            .field("dirty", &self.dirty_index())
            .field("new_write", &self.is_new_write())
            .finish()
    }
}
