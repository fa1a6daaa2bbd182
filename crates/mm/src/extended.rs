//! Extended commands: pinning, root switches and TLB maintenance.
//!
//! The command travels in the low byte of the request value. The target
//! frame comes from the request address; `InvalidateOne` takes its virtual
//! address from the remaining value bits.

use core::fmt;

use crate::domain::Domain;
use crate::error::MmError;
use crate::frame::PageType;
use crate::layout::pfn_of;
use crate::manager::MemoryManager;
use crate::memory::PhysMemory;
use crate::tlb::{CpuContext, Tlb};

/// Bits of the request value selecting the command
pub const CMD_MASK: u32 = 0xff;

/// A decoded extended command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtCommand {
    /// Acquire the frame as an L1 table and hold it there
    PinL1,
    /// Acquire the frame as an L2 table and hold it there
    PinL2,
    /// Drop a pin taken by `PinL1` or `PinL2`
    Unpin,
    /// Make the frame the domain's root table
    NewRootTable,
    /// Flush this processor's TLB at the end of the batch
    FlushTlb,
    /// Invalidate one virtual address now
    InvalidateOne(usize),
}

impl ExtCommand {
    pub const PIN_L1: u32 = 0;
    pub const PIN_L2: u32 = 1;
    // 2 and 3 are held for deeper table levels and rejected here
    pub const UNPIN: u32 = 4;
    pub const NEW_ROOT_TABLE: u32 = 5;
    pub const FLUSH_TLB: u32 = 6;
    pub const INVALIDATE_ONE: u32 = 7;

    /// Decode a request value.
    pub fn decode(val: u32) -> Result<Self, MmError> {
        match val & CMD_MASK {
            Self::PIN_L1 => Ok(Self::PinL1),
            Self::PIN_L2 => Ok(Self::PinL2),
            Self::UNPIN => Ok(Self::Unpin),
            Self::NEW_ROOT_TABLE => Ok(Self::NewRootTable),
            Self::FLUSH_TLB => Ok(Self::FlushTlb),
            Self::INVALIDATE_ONE => Ok(Self::InvalidateOne((val & !CMD_MASK) as usize)),
            other => {
                log::warn!("[MM] invalid extended command {other:#04x}");
                Err(MmError::InvalidCommand)
            }
        }
    }

    /// The request value carrying this command.
    pub fn encode(self) -> u32 {
        match self {
            Self::PinL1 => Self::PIN_L1,
            Self::PinL2 => Self::PIN_L2,
            Self::Unpin => Self::UNPIN,
            Self::NewRootTable => Self::NEW_ROOT_TABLE,
            Self::FlushTlb => Self::FLUSH_TLB,
            Self::InvalidateOne(va) => (va as u32 & !CMD_MASK) | Self::INVALIDATE_ONE,
        }
    }
}

impl fmt::Display for ExtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinL1 => f.write_str("pin L1"),
            Self::PinL2 => f.write_str("pin L2"),
            Self::Unpin => f.write_str("unpin"),
            Self::NewRootTable => f.write_str("new root table"),
            Self::FlushTlb => f.write_str("flush TLB"),
            Self::InvalidateOne(va) => write!(f, "invalidate {va:#x}"),
        }
    }
}

impl<M: PhysMemory> MemoryManager<M> {
    /// Execute the extended command in `val` against the frame holding `ptr`.
    pub fn extended_command(
        &mut self,
        dom: &mut Domain,
        cpu: &mut CpuContext,
        tlb: &dyn Tlb,
        ptr: usize,
        val: u32,
    ) -> Result<(), MmError> {
        let pfn = pfn_of(ptr);
        let cmd = ExtCommand::decode(val)?;
        log::trace!("[MM] {}: {cmd} on {pfn:#x}", dom.id());
        match cmd {
            ExtCommand::PinL1 => {
                self.acquire_l1_table(dom, pfn)?;
                self.frames.pin(pfn)
            }
            ExtCommand::PinL2 => {
                self.acquire_l2_table(dom, pfn)?;
                self.frames.pin(pfn)
            }
            ExtCommand::Unpin => match self.frames.unpin(pfn, dom.id())? {
                PageType::L1Table => self.release_l1_table(dom, cpu, pfn),
                PageType::L2Table => self.release_l2_table(dom, cpu, pfn),
                other => {
                    log::warn!("[MM] {}: pinned frame {pfn:#x} is {other:?}", dom.id());
                    Err(MmError::TypeConflict)
                }
            },
            ExtCommand::NewRootTable => {
                let switched = self.switch_root(dom, cpu, pfn);
                // Every root-table-switch attempt, successful or not,
                // schedules a flush.
                cpu.schedule_flush();
                switched
            }
            ExtCommand::FlushTlb => {
                cpu.schedule_flush();
                Ok(())
            }
            ExtCommand::InvalidateOne(va) => {
                tlb.invalidate_page(va);
                Ok(())
            }
        }
    }

    fn switch_root(
        &mut self,
        dom: &mut Domain,
        cpu: &mut CpuContext,
        pfn: usize,
    ) -> Result<(), MmError> {
        if let Err(e) = self.acquire_l2_table(dom, pfn) {
            log::warn!("[MM] {}: cannot install root {pfn:#x}: {e}", dom.id());
            return Err(e);
        }
        match dom.replace_root(pfn) {
            Some(old) => {
                log::debug!("[MM] {}: root {old:#x} -> {pfn:#x}", dom.id());
                self.release_l2_table(dom, cpu, old)
            }
            None => {
                log::debug!("[MM] {}: root {pfn:#x}", dom.id());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::entry_address;
    use crate::testutil::{Fixture, OTHER, rw};

    fn run(fx: &mut Fixture, pfn: usize, cmd: ExtCommand) -> Result<(), MmError> {
        fx.mm.extended_command(
            &mut fx.dom,
            &mut fx.cpu,
            &fx.tlb,
            entry_address(pfn, 0) | 2,
            cmd.encode(),
        )
    }

    #[test]
    fn test_decode() {
        assert_eq!(ExtCommand::decode(0), Ok(ExtCommand::PinL1));
        assert_eq!(ExtCommand::decode(1), Ok(ExtCommand::PinL2));
        assert_eq!(ExtCommand::decode(4), Ok(ExtCommand::Unpin));
        assert_eq!(ExtCommand::decode(5), Ok(ExtCommand::NewRootTable));
        assert_eq!(ExtCommand::decode(6), Ok(ExtCommand::FlushTlb));
        assert_eq!(
            ExtCommand::decode(0xC000_1007),
            Ok(ExtCommand::InvalidateOne(0xC000_1000))
        );
        // Payload bits are ignored for the other commands
        assert_eq!(ExtCommand::decode(0x1234_5606), Ok(ExtCommand::FlushTlb));
    }

    #[test]
    fn test_decode_rejects_unknown() {
        for val in [2, 3, 8, 0xff, 0x1000_0042] {
            assert_eq!(ExtCommand::decode(val), Err(MmError::InvalidCommand));
        }
    }

    #[test]
    fn test_encode_matches_wire_codes() {
        assert_eq!(ExtCommand::PinL2.encode(), 1);
        assert_eq!(ExtCommand::NewRootTable.encode(), 5);
        assert_eq!(ExtCommand::InvalidateOne(0x8000).encode(), 0x8007);
    }

    #[test]
    fn test_pin_and_unpin_l1() {
        let mut fx = Fixture::new();
        let (t, g) = (fx.frame(), fx.frame());
        fx.poke(t, 0, rw(g));
        let before = fx.desc(t);

        run(&mut fx, t, ExtCommand::PinL1).unwrap();
        let d = fx.desc(t);
        assert!(d.is_pinned());
        assert_eq!(d.page_type(), PageType::L1Table);
        assert_eq!((d.type_count(), d.tot_count()), (1, 1));
        assert_eq!(fx.desc(g).type_count(), 1);

        assert_eq!(
            run(&mut fx, t, ExtCommand::PinL1),
            Err(MmError::AlreadyPinned)
        );
        assert_eq!(fx.desc(t).type_count(), 1);

        run(&mut fx, t, ExtCommand::Unpin).unwrap();
        assert_eq!(fx.desc(t), before);
        assert_eq!(fx.desc(g).tot_count(), 0);
        assert!(fx.cpu.flush_pending());
    }

    #[test]
    fn test_pin_survives_ordinary_release() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        run(&mut fx, t, ExtCommand::PinL2).unwrap();
        fx.mm.acquire_l2_table(&fx.dom, t).unwrap();
        fx.mm.release_l2_table(&fx.dom, &mut fx.cpu, t).unwrap();
        let d = fx.desc(t);
        assert_eq!(d.page_type(), PageType::L2Table);
        assert_eq!(d.type_count(), 1);

        run(&mut fx, t, ExtCommand::Unpin).unwrap();
        assert_eq!(fx.desc(t).page_type(), PageType::None);
    }

    #[test]
    fn test_pin_wrong_type() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        run(&mut fx, t, ExtCommand::PinL1).unwrap();
        assert_eq!(
            run(&mut fx, t, ExtCommand::PinL2),
            Err(MmError::TypeConflict)
        );
        assert!(fx.desc(t).is_pinned());
    }

    #[test]
    fn test_unpin_never_pinned() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        fx.mm.acquire_l1_table(&fx.dom, t).unwrap();
        let before = fx.desc(t);
        assert_eq!(run(&mut fx, t, ExtCommand::Unpin), Err(MmError::NotPinned));
        assert_eq!(fx.desc(t), before);
    }

    #[test]
    fn test_unpin_foreign_frame() {
        let mut fx = Fixture::new();
        let t = fx.frame_for(OTHER);
        assert_eq!(
            run(&mut fx, t, ExtCommand::Unpin),
            Err(MmError::DomainMismatch)
        );
    }

    #[test]
    fn test_unpin_of_non_table_is_a_conflict() {
        let mut fx = Fixture::new();
        for ty in [PageType::None, PageType::WritablePage] {
            let t = fx.frame();
            // Not reachable through the commands
            let desc = fx.mm.frames_mut().get_mut(t).unwrap();
            desc.page_type = ty;
            desc.pinned = true;

            assert_eq!(
                run(&mut fx, t, ExtCommand::Unpin),
                Err(MmError::TypeConflict)
            );
            assert_eq!(fx.desc(t).page_type(), ty);
        }
    }

    #[test]
    fn test_new_root_table_releases_previous() {
        let mut fx = Fixture::new();
        let (first, second) = (fx.frame(), fx.frame());
        fx.mm.install_initial_root(&mut fx.dom, first).unwrap();

        run(&mut fx, second, ExtCommand::NewRootTable).unwrap();
        assert_eq!(fx.dom.root(), Some(second));
        assert_eq!(fx.desc(first).page_type(), PageType::None);
        assert_eq!(fx.desc(second).type_count(), 1);
        assert!(fx.cpu.flush_pending());
    }

    #[test]
    fn test_failed_root_switch_still_flushes() {
        let mut fx = Fixture::new();
        let first = fx.frame();
        fx.mm.install_initial_root(&mut fx.dom, first).unwrap();
        let foreign = fx.frame_for(OTHER);

        assert_eq!(
            run(&mut fx, foreign, ExtCommand::NewRootTable),
            Err(MmError::DomainMismatch)
        );
        assert_eq!(fx.dom.root(), Some(first));
        assert_eq!(fx.desc(first).type_count(), 1);
        assert!(fx.cpu.flush_pending());
    }

    #[test]
    fn test_flush_is_deferred() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        run(&mut fx, t, ExtCommand::FlushTlb).unwrap();
        assert!(fx.cpu.flush_pending());
        assert_eq!(fx.tlb.full_flushes(), 0);
    }

    #[test]
    fn test_invalidate_one_is_immediate() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        run(&mut fx, t, ExtCommand::InvalidateOne(0xC000_3000)).unwrap();
        assert_eq!(fx.tlb.invalidations(), 1);
        assert_eq!(
            fx.tlb.last_va.load(core::sync::atomic::Ordering::SeqCst),
            0xC000_3000
        );
        assert!(!fx.cpu.flush_pending());
    }

    #[test]
    fn test_reserved_codes_rejected() {
        let mut fx = Fixture::new();
        let t = fx.frame();
        let pa = entry_address(t, 0);
        for code in [2, 3] {
            assert_eq!(
                fx.mm
                    .extended_command(&mut fx.dom, &mut fx.cpu, &fx.tlb, pa, code),
                Err(MmError::InvalidCommand)
            );
        }
        assert_eq!(fx.desc(t).type_count(), 0);
    }
}
