//! Recursive acquisition and release of table references.
//!
//! Taking the first reference to a frame in a table role validates its
//! contents, taking references to everything it points at. Dropping the last
//! one walks the contents again and releases those references. Later
//! references only touch the counts.
//!
//! Each level copies its table out of memory before walking it, so nothing
//! below can disturb the entries being walked.

use crate::domain::Domain;
use crate::entry::{PageTableEntry, PteFlags};
use crate::error::MmError;
use crate::frame::PageType;
use crate::layout::{
    DOMAIN_ENTRIES_PER_L2, ENTRIES_PER_TABLE, PERDOMAIN_SLOT, entry_address, pfn_of,
};
use crate::manager::MemoryManager;
use crate::memory::PhysMemory;
use crate::tlb::CpuContext;

impl<M: PhysMemory> MemoryManager<M> {
    /// Take an L1 table reference to `pfn`, validating every present entry
    /// if this is the first one.
    ///
    /// A failure part way through the walk leaves the references already
    /// taken in place.
    pub fn acquire_l1_table(&mut self, dom: &Domain, pfn: usize) -> Result<(), MmError> {
        if self.frames.inc_type_ref(pfn, PageType::L1Table, dom.id())? != 0 {
            return Ok(());
        }
        log::trace!("[MM] {}: validating L1 table {pfn:#x}", dom.id());
        let table = self.mem.read_table(pfn);
        for (slot, entry) in table.present_entries(0..ENTRIES_PER_TABLE) {
            check_bits(entry, PteFlags::L1_DISALLOWED, pfn, slot)?;
            self.acquire_page(dom, entry.pfn(), entry.is_writable())?;
        }
        Ok(())
    }

    /// Take an L2 table reference to `pfn`, validating the guest-visible
    /// slots if this is the first one.
    ///
    /// Every successful call rewrites the hypervisor slots and the
    /// per-domain slot, so a guest cannot keep stale copies there.
    pub fn acquire_l2_table(&mut self, dom: &Domain, pfn: usize) -> Result<(), MmError> {
        if self.frames.inc_type_ref(pfn, PageType::L2Table, dom.id())? == 0 {
            log::trace!("[MM] {}: validating L2 table {pfn:#x}", dom.id());
            let table = self.mem.read_table(pfn);
            for (slot, entry) in table.present_entries(0..DOMAIN_ENTRIES_PER_L2) {
                check_bits(entry, PteFlags::L2_DISALLOWED, pfn, slot)?;
                self.acquire_l1_table(dom, entry.pfn())?;
            }
        }
        self.install_hypervisor_slots(dom, pfn);
        Ok(())
    }

    /// Reference `pfn` from a leaf entry.
    pub fn acquire_page(
        &mut self,
        dom: &Domain,
        pfn: usize,
        writable: bool,
    ) -> Result<(), MmError> {
        self.frames.inc_leaf_ref(pfn, dom.id(), writable)
    }

    /// Drop an L1 table reference. The last one releases every present
    /// entry; all of them are released even if some fail, and the first
    /// failure is reported.
    pub fn release_l1_table(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pfn: usize,
    ) -> Result<(), MmError> {
        if self.frames.dec_type_ref(pfn, PageType::L1Table, dom.id())? != 0 {
            return Ok(());
        }
        log::trace!("[MM] {}: tearing down L1 table {pfn:#x}", dom.id());
        let table = self.mem.read_table(pfn);
        let mut status = Ok(());
        for (_, entry) in table.present_entries(0..ENTRIES_PER_TABLE) {
            let released = self.release_page(dom, cpu, entry.pfn(), entry.is_writable());
            status = status.and(released);
        }
        status
    }

    /// Drop an L2 table reference. The last one releases the L1 tables in
    /// the guest-visible slots; the hypervisor slots hold nothing the guest
    /// took a reference to.
    pub fn release_l2_table(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pfn: usize,
    ) -> Result<(), MmError> {
        if self.frames.dec_type_ref(pfn, PageType::L2Table, dom.id())? != 0 {
            return Ok(());
        }
        log::trace!("[MM] {}: tearing down L2 table {pfn:#x}", dom.id());
        let table = self.mem.read_table(pfn);
        let mut status = Ok(());
        for (_, entry) in table.present_entries(0..DOMAIN_ENTRIES_PER_L2) {
            let released = self.release_l1_table(dom, cpu, entry.pfn());
            status = status.and(released);
        }
        status
    }

    /// Drop a leaf reference. Removing the last writable mapping of a frame
    /// schedules a flush on `cpu`.
    pub fn release_page(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pfn: usize,
        writable: bool,
    ) -> Result<(), MmError> {
        if self.frames.dec_leaf_ref(pfn, dom.id(), writable)? {
            log::trace!(
                "[MM] {}: last writable mapping of {pfn:#x} gone, flush on CPU {}",
                dom.id(),
                cpu.id()
            );
            cpu.schedule_flush();
        }
        Ok(())
    }

    fn install_hypervisor_slots(&mut self, dom: &Domain, pfn: usize) {
        self.mem
            .write_entries(pfn, DOMAIN_ENTRIES_PER_L2, &self.hypervisor_l2);
        self.mem.write_entry(
            entry_address(pfn, PERDOMAIN_SLOT),
            PageTableEntry::from_frame(pfn_of(dom.perdomain_pt()), PteFlags::HYPERVISOR),
        );
    }
}

/// Reject a present entry carrying bits the guest may not set at this level.
pub(crate) fn check_bits(
    entry: PageTableEntry,
    disallowed: PteFlags,
    table: usize,
    slot: usize,
) -> Result<(), MmError> {
    let bad = entry.bad_bits(disallowed);
    if bad.is_empty() {
        return Ok(());
    }
    log::warn!(
        "[MM] bad entry {:#010x} at {table:#x}[{slot}]: {bad:?} not allowed",
        entry.raw()
    );
    Err(MmError::BadHardwareBits)
}
