//! Address-space and table geometry (x86, 32-bit, non-PAE).

/// Page shift (log2 of page size)
pub const PAGE_SHIFT: usize = 12;
/// Page size: 4KB
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Size of one raw table entry in bytes
pub const ENTRY_SIZE: usize = 4;
/// Entries per page table (1024 for 4KB pages with 4-byte entries)
pub const ENTRIES_PER_TABLE: usize = PAGE_SIZE / ENTRY_SIZE;

/// Virtual address bits translated by one L2 slot
pub const L2_PAGETABLE_SHIFT: usize = 22;

/// Start of the hypervisor's virtual region. Everything above is shared by
/// every address space and never under guest control.
pub const HYPERVISOR_VIRT_START: usize = 0xFC00_0000;
/// L2 slots a guest may populate
pub const DOMAIN_ENTRIES_PER_L2: usize = HYPERVISOR_VIRT_START >> L2_PAGETABLE_SHIFT;
/// L2 slots reserved for hypervisor mappings
pub const HYPERVISOR_ENTRIES_PER_L2: usize = ENTRIES_PER_TABLE - DOMAIN_ENTRIES_PER_L2;

/// Per-domain mapping area (inside the hypervisor region)
pub const PERDOMAIN_VIRT_START: usize = 0xFE80_0000;
/// L2 slot holding the per-domain mapping table
pub const PERDOMAIN_SLOT: usize = PERDOMAIN_VIRT_START >> L2_PAGETABLE_SHIFT;

/// Upper bound on physical processors the per-CPU state is sized for
pub const MAX_CPUS: usize = 8;

/// Frame number containing physical address `pa`.
#[inline]
pub const fn pfn_of(pa: usize) -> usize {
    pa >> PAGE_SHIFT
}

/// Physical address of the first byte of frame `pfn`.
#[inline]
pub const fn frame_address(pfn: usize) -> usize {
    pfn << PAGE_SHIFT
}

/// Index of the entry addressed by `pa` within its table.
#[inline]
pub const fn slot_of(pa: usize) -> usize {
    (pa & (PAGE_SIZE - 1)) / ENTRY_SIZE
}

/// Physical address of entry `slot` in the table held by frame `pfn`.
#[inline]
pub const fn entry_address(pfn: usize, slot: usize) -> usize {
    frame_address(pfn) + slot * ENTRY_SIZE
}
