//! Shared environment for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use hv_mm::layout::{entry_address, frame_address};
use hv_mm::{
    CpuContext, Domain, DomainId, FrameArena, FrameDescriptor, MemoryManager, MmConfig,
    PageTableEntry, PageUpdateRequest, PhysMemory, PteFlags, Tlb,
};

pub const GUEST: DomainId = DomainId(1);
pub const NEIGHBOUR: DomainId = DomainId(2);

/// TLB that counts what it was asked to do.
#[derive(Default)]
pub struct CountingTlb {
    flushes: AtomicUsize,
    invalidations: AtomicUsize,
}

impl CountingTlb {
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl Tlb for CountingTlb {
    fn flush_all(&self, _root_pa: Option<usize>) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_page(&self, _va: usize) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// One guest domain on a small machine.
pub struct TestEnv {
    pub mm: MemoryManager<FrameArena>,
    pub dom: Domain,
    pub cpu: CpuContext,
    pub tlb: CountingTlb,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            mm: MemoryManager::new(MmConfig::new(128, 8), FrameArena::new()),
            dom: Domain::new(GUEST, frame_address(2)),
            cpu: CpuContext::new(0),
            tlb: CountingTlb::default(),
        }
    }

    /// A fresh frame owned by the guest.
    pub fn frame(&mut self) -> usize {
        self.frame_for(GUEST)
    }

    pub fn frame_for(&mut self, dom: DomainId) -> usize {
        self.mm
            .frames_mut()
            .alloc_domain_frame(dom)
            .expect("test machine out of frames")
    }

    pub fn desc(&self, pfn: usize) -> FrameDescriptor {
        *self.mm.frames().get(pfn).expect("frame in range")
    }

    /// Write straight into memory, as the guest would before validation.
    pub fn write(&mut self, table: usize, slot: usize, entry: PageTableEntry) {
        self.mm
            .memory_mut()
            .write_entry(entry_address(table, slot), entry);
    }

    pub fn read(&self, table: usize, slot: usize) -> PageTableEntry {
        self.mm.memory().read_entry(entry_address(table, slot))
    }

    /// Submit a batch as the guest.
    pub fn submit(&mut self, updates: &[PageUpdateRequest]) -> Result<usize, hv_mm::BatchFault> {
        self.mm
            .process_page_updates(&mut self.dom, &mut self.cpu, &self.tlb, updates)
    }
}

pub fn rw(pfn: usize) -> PageTableEntry {
    PageTableEntry::from_frame(pfn, PteFlags::PRESENT | PteFlags::WRITABLE)
}

pub fn ro(pfn: usize) -> PageTableEntry {
    PageTableEntry::from_frame(pfn, PteFlags::PRESENT)
}
