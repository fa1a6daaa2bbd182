use crate::config::MmConfig;
use crate::domain::Domain;
use crate::entry::PageTableEntry;
use crate::error::MmError;
use crate::frame::FrameTable;
use crate::layout::HYPERVISOR_ENTRIES_PER_L2;
use crate::memory::PhysMemory;

/// Frame table, physical memory, and the hypervisor's own L2 slots: the
/// state every page-table operation works against.
///
/// The operations themselves live next to their layer: [`crate::validate`],
/// [`crate::modify`], [`crate::extended`] and [`crate::dispatch`].
pub struct MemoryManager<M: PhysMemory> {
    pub(crate) frames: FrameTable,
    pub(crate) mem: M,
    pub(crate) hypervisor_l2: [PageTableEntry; HYPERVISOR_ENTRIES_PER_L2],
    pub(crate) config: MmConfig,
}

impl<M: PhysMemory> MemoryManager<M> {
    /// Build the frame table for `config` over `mem`.
    pub fn new(config: MmConfig, mem: M) -> Self {
        Self {
            frames: FrameTable::new(&config),
            mem,
            hypervisor_l2: [PageTableEntry::empty(); HYPERVISOR_ENTRIES_PER_L2],
            config,
        }
    }

    /// Set the hypervisor's high L2 slots, copied into every validated root.
    pub fn set_hypervisor_mappings(
        &mut self,
        entries: [PageTableEntry; HYPERVISOR_ENTRIES_PER_L2],
    ) {
        self.hypervisor_l2 = entries;
    }

    pub fn hypervisor_mappings(&self) -> &[PageTableEntry; HYPERVISOR_ENTRIES_PER_L2] {
        &self.hypervisor_l2
    }

    pub fn config(&self) -> &MmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// Allocator-side access to the frame table (free list, ownership).
    pub fn frames_mut(&mut self) -> &mut FrameTable {
        &mut self.frames
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    /// Raw access to physical memory, for the domain builder and tests.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// Validate `pfn` as the domain builder's first root table and make it
    /// the domain's active root. Later switches go through the
    /// `NewRootTable` extended command, which releases this reference.
    pub fn install_initial_root(&mut self, dom: &mut Domain, pfn: usize) -> Result<(), MmError> {
        if let Some(current) = dom.root() {
            log::warn!(
                "[MM] {}: already has root {current:#x}, refusing initial root {pfn:#x}",
                dom.id()
            );
            return Err(MmError::TypeConflict);
        }
        self.acquire_l2_table(dom, pfn)?;
        dom.replace_root(pfn);
        log::debug!("[MM] {}: initial root {pfn:#x}", dom.id());
        Ok(())
    }
}
