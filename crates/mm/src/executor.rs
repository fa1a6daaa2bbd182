//! Termination policy for rejected batches.
//!
//! The dispatcher only reports what went wrong. A guest that submits an
//! invalid update has broken the isolation contract, so the executor marks
//! it dying and hands it to the scheduler side to be destroyed.

use hv_utils::Mutex;

use crate::dispatch::{BatchFault, PageUpdateRequest};
use crate::domain::Domain;
use crate::error::MmError;
use crate::frame::DomainId;
use crate::manager::MemoryManager;
use crate::memory::PhysMemory;
use crate::tlb::{CpuContext, Tlb};

/// Scheduler-side hook that tears a domain down.
pub trait DomainControl {
    fn kill_domain(&self, domain: DomainId, fault: &BatchFault);
}

/// Runs update batches against a shared [`MemoryManager`].
pub struct BatchExecutor<'a, M: PhysMemory, C: DomainControl> {
    mm: &'a Mutex<MemoryManager<M>>,
    control: &'a C,
}

impl<'a, M: PhysMemory, C: DomainControl> BatchExecutor<'a, M, C> {
    pub const fn new(mm: &'a Mutex<MemoryManager<M>>, control: &'a C) -> Self {
        Self { mm, control }
    }

    /// Apply `updates` for `dom` on `cpu`, holding the manager's lock for
    /// the whole batch.
    ///
    /// On rejection the domain is marked dying and [`DomainControl`] is
    /// told; the cause is returned. A dying domain's batches are refused
    /// outright.
    pub fn run(
        &self,
        dom: &mut Domain,
        cpu: &mut CpuContext,
        tlb: &dyn Tlb,
        updates: &[PageUpdateRequest],
    ) -> Result<usize, MmError> {
        if dom.is_dying() {
            log::debug!(
                "[MM] {}: dying, batch of {} refused",
                dom.id(),
                updates.len()
            );
            return Err(MmError::DomainDying);
        }

        let result = self.mm.lock().process_page_updates(dom, cpu, tlb, updates);

        result.map_err(|fault| {
            log::error!("[MM] {}: killed: {fault}", dom.id());
            dom.mark_dying(fault);
            self.control.kill_domain(dom.id(), &fault);
            fault.error
        })
    }
}
