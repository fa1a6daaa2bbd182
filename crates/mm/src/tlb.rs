//! TLB maintenance and the per-processor deferred flush flag.
//!
//! Dropping the last writable mapping of a frame, or switching root tables,
//! leaves translations in the TLB that must go before the guest runs again.
//! Rather than flushing on every such event the batch records it in the
//! executing processor's [`CpuContext`] and the dispatcher flushes once at
//! the end. Other processors are not told: a stale translation held by
//! another CPU for a reused table is an open hazard, not something this
//! crate guards against.

/// Processor TLB operations.
pub trait Tlb: Send + Sync {
    /// Discard every non-global translation by reloading the root table.
    /// `root_pa` is the physical address of the domain's root table, or
    /// `None` to reload whatever is currently installed.
    fn flush_all(&self, root_pa: Option<usize>);

    /// Discard the translation for one virtual address.
    fn invalidate_page(&self, va: usize);
}

/// TLB operations of the processor the code is running on.
///
/// Compiles to the real instructions on bare-metal x86; on any other target
/// (host builds and tests) the operations are no-ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchTlb;

impl Tlb for ArchTlb {
    fn flush_all(&self, root_pa: Option<usize>) {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        {
            // SAFETY: reloading CR3 with the running domain's validated root
            // (or with its current value) only drops cached translations.
            unsafe {
                match root_pa {
                    Some(pa) => core::arch::asm!(
                        "mov cr3, {}",
                        in(reg) pa,
                        options(nostack, preserves_flags)
                    ),
                    None => core::arch::asm!(
                        "mov {tmp}, cr3",
                        "mov cr3, {tmp}",
                        tmp = out(reg) _,
                        options(nostack, preserves_flags)
                    ),
                }
            }
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        {
            log::trace!("[TLB] flush_all root={root_pa:?} (no-op on this target)");
        }
    }

    fn invalidate_page(&self, va: usize) {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        {
            // SAFETY: invlpg only drops a cached translation.
            unsafe {
                core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
            }
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        {
            log::trace!("[TLB] invalidate {va:#x} (no-op on this target)");
        }
    }
}

/// Per-processor execution context owned by the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuContext {
    id: usize,
    flush_pending: bool,
}

impl CpuContext {
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            flush_pending: false,
        }
    }

    pub const fn id(&self) -> usize {
        self.id
    }

    /// Request a full flush before this processor next runs guest code.
    pub fn schedule_flush(&mut self) {
        self.flush_pending = true;
    }

    pub const fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    /// Clear the flag, returning whether it was set.
    pub(crate) fn take_flush(&mut self) -> bool {
        core::mem::replace(&mut self.flush_pending, false)
    }
}
