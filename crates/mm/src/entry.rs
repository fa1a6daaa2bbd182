use bitflags::bitflags;
use core::ops::Range;

use crate::layout::{ENTRIES_PER_TABLE, PAGE_SHIFT};

// x86 32-bit (non-PAE) page table entry and table structures.
// Guests build these values themselves, so the layout is the hardware one.

bitflags! {
    /// Page table entry flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// Large page (L2 entries)
        const PSE = 1 << 7;
        /// Page attribute table index (L1 entries, same bit as PSE)
        const PAT = 1 << 7;
        const GLOBAL = 1 << 8;
    }
}

impl PteFlags {
    /// Bits a guest may not set in a present L1 entry
    pub const L1_DISALLOWED: PteFlags = PteFlags::GLOBAL.union(PteFlags::PAT);
    /// Bits a guest may not set in a present L2 entry
    pub const L2_DISALLOWED: PteFlags = PteFlags::GLOBAL.union(PteFlags::PSE);
    /// Flags for hypervisor-installed L2 entries
    pub const HYPERVISOR: PteFlags = PteFlags::PRESENT
        .union(PteFlags::WRITABLE)
        .union(PteFlags::ACCESSED)
        .union(PteFlags::DIRTY);
}

/// Frame-number bits of an entry
pub const FRAME_MASK: u32 = 0xFFFF_F000;
/// Bits whose change means an L2 entry references something else
pub const L2_MAPPING_MASK: u32 = FRAME_MASK | PteFlags::PRESENT.bits();
/// Bits whose change means an L1 entry references something else
pub const L1_MAPPING_MASK: u32 = FRAME_MASK | PteFlags::PRESENT.bits() | PteFlags::WRITABLE.bits();

/// A raw 32-bit page table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap a raw value exactly as the guest supplied it.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Entry referencing frame `pfn` with `flags`.
    pub const fn from_frame(pfn: usize, flags: PteFlags) -> Self {
        Self(((pfn as u32) << PAGE_SHIFT) | flags.bits())
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(PteFlags::WRITABLE)
    }

    /// Referenced frame number.
    pub const fn pfn(&self) -> usize {
        (self.0 >> PAGE_SHIFT) as usize
    }

    /// Disallowed bits this entry carries, given the level's mask.
    pub fn bad_bits(&self, disallowed: PteFlags) -> PteFlags {
        self.flags().intersection(disallowed)
    }

    /// True if the two entries differ in any bit under `mask`.
    pub const fn differs_from(&self, other: PageTableEntry, mask: u32) -> bool {
        (self.0 ^ other.0) & mask != 0
    }
}

/// One page table, copied out of guest memory.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageTableEntry; ENTRIES_PER_TABLE],
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: [PageTableEntry::empty(); ENTRIES_PER_TABLE],
        }
    }

    pub fn entry(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        &mut self.entries[index]
    }

    /// Present entries within `slots`, with their indices.
    pub fn present_entries(
        &self,
        slots: Range<usize>,
    ) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries[slots.clone()]
            .iter()
            .zip(slots)
            .filter(|(e, _)| e.is_present())
            .map(|(e, slot)| (slot, *e))
    }
}
