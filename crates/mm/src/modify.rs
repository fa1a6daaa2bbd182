//! Single-entry updates to validated tables.
//!
//! The new value is written first. If the reference change it implies cannot
//! be made, the old raw value goes back and the update fails; a reference
//! already dropped for the old value stays dropped.

use crate::domain::Domain;
use crate::entry::{L1_MAPPING_MASK, L2_MAPPING_MASK, PageTableEntry, PteFlags};
use crate::error::MmError;
use crate::layout::{DOMAIN_ENTRIES_PER_L2, pfn_of, slot_of};
use crate::manager::MemoryManager;
use crate::memory::PhysMemory;
use crate::tlb::CpuContext;
use crate::validate::check_bits;

impl<M: PhysMemory> MemoryManager<M> {
    /// Replace the L2 entry at physical address `pa` with `new`.
    ///
    /// The caller has checked that the frame holding `pa` is one of the
    /// domain's L2 tables.
    pub fn modify_l2_entry(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pa: usize,
        new: PageTableEntry,
    ) -> Result<(), MmError> {
        let slot = slot_of(pa);
        if slot >= DOMAIN_ENTRIES_PER_L2 {
            log::warn!(
                "[MM] {}: L2 update in hypervisor area at {pa:#x} (slot {slot})",
                dom.id()
            );
            return Err(MmError::ReservedSlot);
        }

        let old = self.mem.read_entry(pa);
        self.mem.write_entry(pa, new);
        let result = self.switch_l2_reference(dom, cpu, pa, old, new);
        if result.is_err() {
            self.mem.write_entry(pa, old);
        }
        result
    }

    /// Replace the L1 entry at physical address `pa` with `new`.
    ///
    /// The caller has checked that the frame holding `pa` is one of the
    /// domain's L1 tables.
    pub fn modify_l1_entry(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pa: usize,
        new: PageTableEntry,
    ) -> Result<(), MmError> {
        let old = self.mem.read_entry(pa);
        self.mem.write_entry(pa, new);
        let result = self.switch_l1_reference(dom, cpu, pa, old, new);
        if result.is_err() {
            self.mem.write_entry(pa, old);
        }
        result
    }

    fn switch_l2_reference(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pa: usize,
        old: PageTableEntry,
        new: PageTableEntry,
    ) -> Result<(), MmError> {
        if new.is_present() {
            check_bits(new, PteFlags::L2_DISALLOWED, pfn_of(pa), slot_of(pa))?;
        }
        if !old.differs_from(new, L2_MAPPING_MASK) {
            return Ok(());
        }
        if old.is_present() {
            self.release_l1_table(dom, cpu, old.pfn())?;
        }
        if new.is_present() {
            self.acquire_l1_table(dom, new.pfn())?;
        }
        Ok(())
    }

    fn switch_l1_reference(
        &mut self,
        dom: &Domain,
        cpu: &mut CpuContext,
        pa: usize,
        old: PageTableEntry,
        new: PageTableEntry,
    ) -> Result<(), MmError> {
        if new.is_present() {
            check_bits(new, PteFlags::L1_DISALLOWED, pfn_of(pa), slot_of(pa))?;
        }
        if !old.differs_from(new, L1_MAPPING_MASK) {
            return Ok(());
        }
        if old.is_present() {
            self.release_page(dom, cpu, old.pfn(), old.is_writable())?;
        }
        if new.is_present() {
            self.acquire_page(dom, new.pfn(), new.is_writable())?;
        }
        Ok(())
    }
}
