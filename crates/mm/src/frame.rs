//! Frame descriptor store and free list.
//!
//! Every physical frame has one [`FrameDescriptor`] in the [`FrameTable`].
//! The descriptor records who owns the frame, what it is currently used as,
//! and how many references to it exist. The frame's contents are never
//! touched here; see [`crate::memory`] for that.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use crate::config::MmConfig;
use crate::error::MmError;

/// Identifier of a guest domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub u16);

impl DomainId {
    /// The privileged control domain
    pub const CONTROL: DomainId = DomainId(0);

    pub const fn is_control(self) -> bool {
        self.0 == Self::CONTROL.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DOM{}", self.0)
    }
}

/// What a frame is currently used as. The uses are mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PageType {
    #[default]
    None,
    L1Table,
    L2Table,
    WritablePage,
}

impl PageType {
    /// Position of the type tag in the packed descriptor flags word.
    pub const FLAGS_SHIFT: u32 = 24;

    /// Type tag as it appears in the packed flags word.
    pub const fn flags_bits(self) -> u32 {
        let tag = match self {
            PageType::None => 0,
            PageType::L1Table => 1,
            PageType::L2Table => 2,
            PageType::WritablePage => 3,
        };
        tag << Self::FLAGS_SHIFT
    }
}

/// Metadata for one physical frame.
///
/// `type_count` and `tot_count` hold ordinary references only. A pinned
/// frame carries one extra implicit reference on both counts; the public
/// accessors include it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FrameDescriptor {
    pub(crate) owner: Option<DomainId>,
    pub(crate) page_type: PageType,
    pub(crate) type_count: u32,
    pub(crate) tot_count: u32,
    pub(crate) pinned: bool,
}

impl FrameDescriptor {
    pub const fn new() -> Self {
        Self {
            owner: None,
            page_type: PageType::None,
            type_count: 0,
            tot_count: 0,
            pinned: false,
        }
    }

    pub const fn owner(&self) -> Option<DomainId> {
        self.owner
    }

    pub const fn page_type(&self) -> PageType {
        self.page_type
    }

    /// References in the frame's current role, including the pin.
    pub const fn type_count(&self) -> u32 {
        self.type_count + self.pinned as u32
    }

    /// All references to the frame, including the pin.
    pub const fn tot_count(&self) -> u32 {
        self.tot_count + self.pinned as u32
    }

    pub const fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_owned_by(&self, dom: DomainId) -> bool {
        self.owner == Some(dom)
    }

    /// Owner id and type tag packed into one word: type in the high byte,
    /// owner id in the low bits, zero for an unowned frame.
    pub fn flags_word(&self) -> u32 {
        let owner = self.owner.map_or(0, |d| u32::from(d.0));
        self.page_type.flags_bits() | owner
    }
}

/// Per-frame metadata array plus the list of frames nobody owns.
pub struct FrameTable {
    frames: Vec<FrameDescriptor>,
    free_list: VecDeque<usize>,
}

impl FrameTable {
    /// Build the descriptor array for `config.nr_frames` frames.
    ///
    /// Frames below `config.reserved_frames` hold the hypervisor and the
    /// table itself and stay off the free list. Every other frame starts
    /// free, queued in ascending order.
    pub fn new(config: &MmConfig) -> Self {
        let frames = alloc::vec![FrameDescriptor::new(); config.nr_frames];
        let first_free = config.nr_frames - config.allocatable_frames();
        let free_list: VecDeque<usize> = (first_free..config.nr_frames).collect();
        log::debug!(
            "[MM] frame table: {} frames, {} free",
            config.nr_frames,
            free_list.len()
        );
        Self { frames, free_list }
    }

    /// Number of installed frames (one past the highest valid frame number).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, pfn: usize) -> Option<&FrameDescriptor> {
        self.frames.get(pfn)
    }

    pub(crate) fn get_mut(&mut self, pfn: usize) -> Result<&mut FrameDescriptor, MmError> {
        let max = self.frames.len();
        self.frames.get_mut(pfn).ok_or_else(|| {
            log::warn!("[MM] frame {pfn:#x} out of range (max {max:#x})");
            MmError::OutOfRange
        })
    }

    pub fn free_frames(&self) -> usize {
        self.free_list.len()
    }

    /// Take a frame off the free list and hand it to `dom`.
    pub fn alloc_domain_frame(&mut self, dom: DomainId) -> Result<usize, MmError> {
        let pfn = self.free_list.pop_front().ok_or(MmError::OutOfMemory)?;
        let desc = &mut self.frames[pfn];
        *desc = FrameDescriptor::new();
        desc.owner = Some(dom);
        Ok(pfn)
    }

    /// Return an owned, wholly unreferenced frame to the free list.
    pub fn free_domain_frame(&mut self, pfn: usize) -> Result<(), MmError> {
        let desc = self.get_mut(pfn)?;
        if desc.owner.is_none() {
            return Err(MmError::DomainMismatch);
        }
        if desc.tot_count() != 0 {
            log::warn!(
                "[MM] frame {pfn:#x} still referenced (tot={}), not freeing",
                desc.tot_count()
            );
            return Err(MmError::FrameInUse);
        }
        *desc = FrameDescriptor::new();
        self.free_list.push_back(pfn);
        Ok(())
    }
}
