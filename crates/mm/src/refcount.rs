//! Reference-count engine.
//!
//! A frame's total count covers every use of it. Its type count covers uses
//! in the current role only, and the role may change only while that count
//! is zero. Each call here checks and updates one descriptor; nothing walks
//! table contents.

use crate::error::MmError;
use crate::frame::{DomainId, FrameTable, PageType};

impl FrameTable {
    /// Take a typed reference to `pfn` on behalf of `dom`.
    ///
    /// Returns the type count before the increment. Zero means this is the
    /// first reference in this role and the caller must validate the contents.
    pub fn inc_type_ref(
        &mut self,
        pfn: usize,
        ty: PageType,
        dom: DomainId,
    ) -> Result<u32, MmError> {
        let desc = self.get_mut(pfn)?;
        if !desc.is_owned_by(dom) {
            log::warn!("[MM] {dom}: frame {pfn:#x} belongs to {:?}", desc.owner());
            return Err(MmError::DomainMismatch);
        }
        if ty == PageType::None {
            return Err(MmError::TypeConflict);
        }
        if desc.page_type != ty {
            if desc.type_count() != 0 {
                log::warn!(
                    "[MM] {dom}: frame {pfn:#x} is {:?} (count {}), wanted {ty:?}",
                    desc.page_type,
                    desc.type_count()
                );
                return Err(MmError::TypeConflict);
            }
            desc.page_type = ty;
        }
        let prior = desc.type_count();
        desc.type_count += 1;
        desc.tot_count += 1;
        Ok(prior)
    }

    /// Drop a typed reference to `pfn`. Returns the remaining type count;
    /// at zero the frame's type tag is cleared.
    pub fn dec_type_ref(
        &mut self,
        pfn: usize,
        ty: PageType,
        dom: DomainId,
    ) -> Result<u32, MmError> {
        let desc = self.get_mut(pfn)?;
        if !desc.is_owned_by(dom) {
            log::warn!(
                "[MM] {dom}: release of frame {pfn:#x} owned by {:?}",
                desc.owner()
            );
            return Err(MmError::DomainMismatch);
        }
        if desc.page_type != ty || desc.type_count == 0 {
            log::warn!(
                "[MM] {dom}: release of frame {pfn:#x} as {ty:?}, but it is {:?} (count {})",
                desc.page_type,
                desc.type_count
            );
            return Err(MmError::TypeConflict);
        }
        desc.type_count -= 1;
        desc.tot_count -= 1;
        let remaining = desc.type_count();
        if remaining == 0 {
            desc.page_type = PageType::None;
        }
        Ok(remaining)
    }

    /// Reference `pfn` from a leaf entry. A writable mapping also takes a
    /// `WritablePage` type reference, which excludes any table use.
    pub fn inc_leaf_ref(
        &mut self,
        pfn: usize,
        dom: DomainId,
        writable: bool,
    ) -> Result<(), MmError> {
        let desc = self.get_mut(pfn)?;
        if !desc.is_owned_by(dom) {
            log::warn!(
                "[MM] {dom}: mapping of frame {pfn:#x} owned by {:?}",
                desc.owner()
            );
            return Err(MmError::DomainMismatch);
        }
        if writable {
            if desc.page_type != PageType::WritablePage {
                if desc.type_count() != 0 {
                    log::warn!(
                        "[MM] {dom}: writable mapping of frame {pfn:#x} in use as {:?} (count {})",
                        desc.page_type,
                        desc.type_count()
                    );
                    return Err(MmError::TypeConflict);
                }
                desc.page_type = PageType::WritablePage;
            }
            desc.type_count += 1;
        }
        desc.tot_count += 1;
        Ok(())
    }

    /// Drop a leaf reference to `pfn`.
    ///
    /// Returns true when this removed the last writable mapping; the caller
    /// then owes a TLB flush, since stale writable translations may survive.
    pub fn dec_leaf_ref(
        &mut self,
        pfn: usize,
        dom: DomainId,
        writable: bool,
    ) -> Result<bool, MmError> {
        let desc = self.get_mut(pfn)?;
        if !desc.is_owned_by(dom) {
            log::warn!(
                "[MM] {dom}: unmapping frame {pfn:#x} owned by {:?}",
                desc.owner()
            );
            return Err(MmError::DomainMismatch);
        }
        // Typed references sit in both counts, so a read-only mapping can only
        // be dropped while tot exceeds type.
        let unbalanced = if writable {
            desc.page_type != PageType::WritablePage || desc.type_count == 0
        } else {
            desc.tot_count <= desc.type_count
        };
        if unbalanced {
            log::warn!(
                "[MM] {dom}: unbalanced unmap of frame {pfn:#x} ({:?}, type={} tot={})",
                desc.page_type,
                desc.type_count,
                desc.tot_count
            );
            return Err(MmError::TypeConflict);
        }
        let mut drained = false;
        if writable {
            desc.type_count -= 1;
            if desc.type_count() == 0 {
                desc.page_type = PageType::None;
                drained = true;
            }
        }
        desc.tot_count -= 1;
        Ok(drained)
    }

    /// Hand the reference just taken by a successful table acquire over to
    /// the pin. Fails if the frame was already pinned; the acquired reference
    /// is dropped either way.
    pub(crate) fn pin(&mut self, pfn: usize) -> Result<(), MmError> {
        let desc = self.get_mut(pfn)?;
        if desc.type_count == 0 || desc.tot_count == 0 {
            return Err(MmError::TypeConflict);
        }
        desc.type_count -= 1;
        desc.tot_count -= 1;
        if desc.pinned {
            log::warn!("[MM] frame {pfn:#x} already pinned");
            return Err(MmError::AlreadyPinned);
        }
        desc.pinned = true;
        Ok(())
    }

    /// Turn the pin back into an ordinary reference, to be dropped by the
    /// matching release. Returns the frame's type for the caller to pick
    /// that release.
    pub(crate) fn unpin(&mut self, pfn: usize, dom: DomainId) -> Result<PageType, MmError> {
        let desc = self.get_mut(pfn)?;
        if !desc.is_owned_by(dom) {
            log::warn!(
                "[MM] {dom}: unpin of frame {pfn:#x} owned by {:?}",
                desc.owner()
            );
            return Err(MmError::DomainMismatch);
        }
        if !desc.pinned {
            log::warn!("[MM] {dom}: frame {pfn:#x} not pinned");
            return Err(MmError::NotPinned);
        }
        desc.pinned = false;
        desc.type_count += 1;
        desc.tot_count += 1;
        Ok(desc.page_type)
    }
}
