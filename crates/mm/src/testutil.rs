//! Shared fixtures for the unit tests.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::MmConfig;
use crate::domain::Domain;
use crate::entry::{PageTableEntry, PteFlags};
use crate::frame::{DomainId, FrameDescriptor};
use crate::layout::{entry_address, frame_address};
use crate::manager::MemoryManager;
use crate::memory::{FrameArena, PhysMemory};
use crate::tlb::{CpuContext, Tlb};

pub const DOM: DomainId = DomainId(1);
pub const OTHER: DomainId = DomainId(2);

/// TLB double counting what the mm asked of it.
#[derive(Default)]
pub struct RecordingTlb {
    pub full_flushes: AtomicUsize,
    pub invalidations: AtomicUsize,
    pub last_root: AtomicUsize,
    pub last_va: AtomicUsize,
}

impl RecordingTlb {
    pub fn full_flushes(&self) -> usize {
        self.full_flushes.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl Tlb for RecordingTlb {
    fn flush_all(&self, root_pa: Option<usize>) {
        self.full_flushes.fetch_add(1, Ordering::SeqCst);
        self.last_root.store(root_pa.unwrap_or(0), Ordering::SeqCst);
    }

    fn invalidate_page(&self, va: usize) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.last_va.store(va, Ordering::SeqCst);
    }
}

/// A 64-frame machine with frames 0..4 reserved, one running domain and
/// one processor.
pub struct Fixture {
    pub mm: MemoryManager<FrameArena>,
    pub dom: Domain,
    pub cpu: CpuContext,
    pub tlb: RecordingTlb,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(MmConfig::new(64, 4))
    }

    pub fn with_config(config: MmConfig) -> Self {
        Self {
            mm: MemoryManager::new(config, FrameArena::new()),
            // Frame 1 plays the per-domain table
            dom: Domain::new(DOM, frame_address(1)),
            cpu: CpuContext::new(0),
            tlb: RecordingTlb::default(),
        }
    }

    /// Allocate a frame to the fixture's domain.
    pub fn frame(&mut self) -> usize {
        self.frame_for(self.dom.id())
    }

    pub fn frame_for(&mut self, dom: DomainId) -> usize {
        self.mm
            .frames_mut()
            .alloc_domain_frame(dom)
            .expect("free frame")
    }

    pub fn desc(&self, pfn: usize) -> FrameDescriptor {
        *self.mm.frames().get(pfn).expect("frame in range")
    }

    /// Write a raw entry straight into memory, bypassing validation.
    pub fn poke(&mut self, table: usize, slot: usize, entry: PageTableEntry) {
        self.mm
            .memory_mut()
            .write_entry(entry_address(table, slot), entry);
    }

    pub fn peek(&self, table: usize, slot: usize) -> PageTableEntry {
        self.mm.memory().read_entry(entry_address(table, slot))
    }
}

pub fn rw(pfn: usize) -> PageTableEntry {
    PageTableEntry::from_frame(pfn, PteFlags::PRESENT | PteFlags::WRITABLE)
}

pub fn ro(pfn: usize) -> PageTableEntry {
    PageTableEntry::from_frame(pfn, PteFlags::PRESENT)
}
