//! Batch entry point for guest page-table updates.
//!
//! A batch is an ordered list of `(ptr, val)` requests. The two low bits of
//! `ptr` pick the lane; the rest is the physical address of a table entry,
//! or of the frame an extended command applies to. Requests are applied in
//! order and the first rejection ends the batch.

use core::fmt;

use crate::config::UncheckedPolicy;
use crate::domain::Domain;
use crate::entry::PageTableEntry;
use crate::error::MmError;
use crate::extended::ExtCommand;
use crate::frame::{FrameDescriptor, PageType};
use crate::layout::{frame_address, pfn_of};
use crate::manager::MemoryManager;
use crate::memory::PhysMemory;
use crate::tlb::{CpuContext, Tlb};

/// Bits of the request address selecting the lane
pub const LANE_MASK: usize = 3;

/// How a request is to be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum UpdateLane {
    /// Checked update of an L1 or L2 entry
    Normal = 0,
    /// Raw write into one of the control domain's L1 tables
    UncheckedUpdate = 1,
    /// Extended command in the low byte of the value
    ExtendedCommand = 2,
}

impl UpdateLane {
    pub fn from_ptr(ptr: usize) -> Result<Self, MmError> {
        match ptr & LANE_MASK {
            0 => Ok(Self::Normal),
            1 => Ok(Self::UncheckedUpdate),
            2 => Ok(Self::ExtendedCommand),
            _ => Err(MmError::InvalidLane),
        }
    }
}

/// One guest request, as laid out in the guest's batch buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct PageUpdateRequest {
    pub ptr: usize,
    pub val: u32,
}

impl PageUpdateRequest {
    pub const fn new(ptr: usize, val: u32) -> Self {
        Self { ptr, val }
    }

    /// Checked write of `entry` to the table entry at `pa`.
    pub const fn normal(pa: usize, entry: PageTableEntry) -> Self {
        Self::new(pa & !LANE_MASK, entry.raw())
    }

    /// Unchecked write of `entry` to the table entry at `pa`.
    pub const fn unchecked(pa: usize, entry: PageTableEntry) -> Self {
        Self::new(
            (pa & !LANE_MASK) | UpdateLane::UncheckedUpdate as usize,
            entry.raw(),
        )
    }

    /// Extended command `cmd` against frame `pfn`.
    pub fn extended(pfn: usize, cmd: ExtCommand) -> Self {
        Self::new(
            frame_address(pfn) | UpdateLane::ExtendedCommand as usize,
            cmd.encode(),
        )
    }

    pub fn lane(&self) -> Result<UpdateLane, MmError> {
        UpdateLane::from_ptr(self.ptr)
    }

    /// Physical address with the lane bits cleared.
    pub const fn address(&self) -> usize {
        self.ptr & !LANE_MASK
    }
}

/// A rejected batch: which request failed and why.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchFault {
    /// Position of the failing request in the batch
    pub index: usize,
    pub request: PageUpdateRequest,
    pub error: MmError,
}

impl fmt::Display for BatchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "update {} (ptr={:#x}, val={:#010x}) rejected: {}",
            self.index, self.request.ptr, self.request.val, self.error
        )
    }
}

impl core::error::Error for BatchFault {}

impl<M: PhysMemory> MemoryManager<M> {
    /// Apply `updates` in order on behalf of `dom`, running on `cpu`.
    ///
    /// Returns the number of requests applied, or the first rejection.
    /// Requests before a rejection stay applied. Whichever way the batch
    /// ends, a flush scheduled on `cpu` during it is carried out exactly
    /// once before returning.
    pub fn process_page_updates(
        &mut self,
        dom: &mut Domain,
        cpu: &mut CpuContext,
        tlb: &dyn Tlb,
        updates: &[PageUpdateRequest],
    ) -> Result<usize, BatchFault> {
        let mut outcome = Ok(updates.len());
        for (index, &request) in updates.iter().enumerate() {
            if let Err(error) = self.apply_update(dom, cpu, tlb, request) {
                log::warn!(
                    "[MM] {}: update {index} (ptr={:#x}, val={:#010x}) rejected: {error}",
                    dom.id(),
                    request.ptr,
                    request.val
                );
                outcome = Err(BatchFault {
                    index,
                    request,
                    error,
                });
                break;
            }
        }

        if cpu.take_flush() {
            log::debug!("[TLB] {}: batch flush on CPU {}", dom.id(), cpu.id());
            tlb.flush_all(dom.root_address());
        }
        outcome
    }

    fn apply_update(
        &mut self,
        dom: &mut Domain,
        cpu: &mut CpuContext,
        tlb: &dyn Tlb,
        request: PageUpdateRequest,
    ) -> Result<(), MmError> {
        let pfn = pfn_of(request.ptr);
        let Some(desc) = self.frames.get(pfn).copied() else {
            log::warn!(
                "[MM] {}: frame {pfn:#x} out of range (max {:#x})",
                dom.id(),
                self.frames.len()
            );
            return Err(MmError::OutOfRange);
        };
        let pa = request.address();
        let entry = PageTableEntry::new(request.val);

        match request.lane()? {
            UpdateLane::Normal => {
                if !desc.is_owned_by(dom.id()) {
                    log::warn!(
                        "[MM] {}: update to frame {pfn:#x} owned by {:?}",
                        dom.id(),
                        desc.owner()
                    );
                    return Err(MmError::DomainMismatch);
                }
                match desc.page_type() {
                    PageType::L1Table => self.modify_l1_entry(dom, cpu, pa, entry),
                    PageType::L2Table => self.modify_l2_entry(dom, cpu, pa, entry),
                    other => {
                        log::warn!(
                            "[MM] {}: update to non-table frame {pfn:#x} ({other:?})",
                            dom.id()
                        );
                        Err(MmError::NotPageTable)
                    }
                }
            }
            UpdateLane::UncheckedUpdate => {
                self.check_unchecked(dom, pfn, &desc)?;
                self.mem.write_entry(pa, entry);
                Ok(())
            }
            UpdateLane::ExtendedCommand => self.extended_command(dom, cpu, tlb, pa, request.val),
        }
    }

    /// Gate for the unchecked lane: only the control domain, only into its
    /// own L1 tables. See [`UncheckedPolicy`] for the two forms of the check.
    fn check_unchecked(
        &self,
        dom: &Domain,
        pfn: usize,
        desc: &FrameDescriptor,
    ) -> Result<(), MmError> {
        let caller = dom.id();
        let allowed = match self.config.unchecked_policy {
            UncheckedPolicy::Literal => {
                desc.flags_word() | u32::from(caller.0) == PageType::L1Table.flags_bits()
            }
            UncheckedPolicy::Strict => {
                caller.is_control()
                    && desc.is_owned_by(caller)
                    && desc.page_type() == PageType::L1Table
            }
        };
        if allowed {
            return Ok(());
        }
        log::warn!(
            "[MM] unchecked update by {caller} to frame {pfn:#x} refused (flags {:#010x})",
            desc.flags_word()
        );
        if desc.page_type() == PageType::L1Table {
            Err(MmError::DomainMismatch)
        } else {
            Err(MmError::NotPageTable)
        }
    }
}
