//! Access to frame contents.
//!
//! Validation never holds a pointer into guest memory across a recursive
//! call: each level copies its table out through [`PhysMemory::read_table`]
//! and works on the copy. Writes go back through the trait one entry (or one
//! run of entries) at a time.

use alloc::boxed::Box;
use hv_utils::HashMap;

use crate::entry::{PageTable, PageTableEntry};
use crate::layout::{ENTRIES_PER_TABLE, entry_address, pfn_of, slot_of};

/// Interface to physical memory holding page tables.
pub trait PhysMemory: Send {
    /// Read the entry at physical address `pa`.
    fn read_entry(&self, pa: usize) -> PageTableEntry;

    /// Write the entry at physical address `pa`.
    fn write_entry(&mut self, pa: usize, entry: PageTableEntry);

    /// Copy the whole of frame `pfn` out as a table.
    fn read_table(&self, pfn: usize) -> PageTable {
        let mut table = PageTable::new();
        for (slot, entry) in table.entries.iter_mut().enumerate() {
            *entry = self.read_entry(entry_address(pfn, slot));
        }
        table
    }

    /// Write `entries` into frame `pfn` starting at slot `first`.
    fn write_entries(&mut self, pfn: usize, first: usize, entries: &[PageTableEntry]) {
        for (i, entry) in entries.iter().enumerate() {
            self.write_entry(entry_address(pfn, first + i), *entry);
        }
    }
}

/// Host-side physical memory: frames are allocated on first write and read
/// as zero until then.
#[derive(Default)]
pub struct FrameArena {
    frames: HashMap<usize, Box<PageTable>>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames that have been written to.
    pub fn backed_frames(&self) -> usize {
        self.frames.len()
    }

    fn frame_mut(&mut self, pfn: usize) -> &mut PageTable {
        self.frames
            .entry(pfn)
            .or_insert_with(|| Box::new(PageTable::new()))
    }
}

impl PhysMemory for FrameArena {
    fn read_entry(&self, pa: usize) -> PageTableEntry {
        self.frames
            .get(&pfn_of(pa))
            .map_or(PageTableEntry::empty(), |t| t.entry(slot_of(pa)))
    }

    fn write_entry(&mut self, pa: usize, entry: PageTableEntry) {
        *self.frame_mut(pfn_of(pa)).entry_mut(slot_of(pa)) = entry;
    }

    fn read_table(&self, pfn: usize) -> PageTable {
        self.frames
            .get(&pfn)
            .map_or_else(PageTable::new, |t| (**t).clone())
    }

    fn write_entries(&mut self, pfn: usize, first: usize, entries: &[PageTableEntry]) {
        let end = (first + entries.len()).min(ENTRIES_PER_TABLE);
        let table = self.frame_mut(pfn);
        table.entries[first..end].copy_from_slice(&entries[..end - first]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PteFlags;

    #[test]
    fn test_unbacked_frame_reads_zero() {
        let mem = FrameArena::new();
        assert_eq!(mem.read_entry(0x5000), PageTableEntry::empty());
        let table = mem.read_table(5);
        assert_eq!(table.present_entries(0..ENTRIES_PER_TABLE).count(), 0);
        assert_eq!(mem.backed_frames(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let mut mem = FrameArena::new();
        let e = PageTableEntry::from_frame(9, PteFlags::PRESENT);
        mem.write_entry(entry_address(5, 17), e);
        assert_eq!(mem.read_entry(entry_address(5, 17)), e);
        assert_eq!(mem.read_table(5).entry(17), e);
        assert_eq!(mem.backed_frames(), 1);
    }

    #[test]
    fn test_read_table_is_a_copy() {
        let mut mem = FrameArena::new();
        let e = PageTableEntry::from_frame(9, PteFlags::PRESENT);
        mem.write_entry(entry_address(5, 0), e);
        let copy = mem.read_table(5);
        // Later writes do not reach an already-taken copy
        mem.write_entry(entry_address(5, 0), PageTableEntry::empty());
        assert_eq!(copy.entry(0), e);
    }

    #[test]
    fn test_write_entries_run() {
        let mut mem = FrameArena::new();
        let run = [
            PageTableEntry::from_frame(1, PteFlags::PRESENT),
            PageTableEntry::from_frame(2, PteFlags::PRESENT),
        ];
        mem.write_entries(3, 1022, &run);
        assert_eq!(mem.read_entry(entry_address(3, 1022)), run[0]);
        assert_eq!(mem.read_entry(entry_address(3, 1023)), run[1]);
    }

    #[test]
    fn test_default_write_entries_matches_arena() {
        // Minimal implementation relying on the trait's default methods
        struct Flat(std::vec::Vec<PageTableEntry>);
        impl PhysMemory for Flat {
            fn read_entry(&self, pa: usize) -> PageTableEntry {
                self.0[pa / 4]
            }
            fn write_entry(&mut self, pa: usize, entry: PageTableEntry) {
                self.0[pa / 4] = entry;
            }
        }

        let mut flat = Flat(std::vec![PageTableEntry::empty(); 2 * ENTRIES_PER_TABLE]);
        let e = PageTableEntry::from_frame(4, PteFlags::PRESENT);
        flat.write_entries(1, 10, &[e]);
        assert_eq!(flat.read_table(1).entry(10), e);
        assert_eq!(flat.read_table(0).entry(10), PageTableEntry::empty());
    }
}
