use crate::dispatch::BatchFault;
use crate::frame::DomainId;
use crate::layout::frame_address;

/// Lifecycle of a domain as far as page-table updates are concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainState {
    Running,
    /// A batch violated isolation; the domain is being torn down.
    Dying(BatchFault),
}

/// The mm view of a guest domain: its id, its active root table, and the
/// per-domain mapping table the hypervisor splices into every root.
#[derive(Clone, Debug)]
pub struct Domain {
    id: DomainId,
    root: Option<usize>,
    perdomain_pt: usize,
    state: DomainState,
}

impl Domain {
    /// `perdomain_pt` is the physical address of the hypervisor-owned table
    /// mapped at the per-domain slot of each of this domain's roots.
    pub const fn new(id: DomainId, perdomain_pt: usize) -> Self {
        Self {
            id,
            root: None,
            perdomain_pt,
            state: DomainState::Running,
        }
    }

    pub const fn id(&self) -> DomainId {
        self.id
    }

    /// Frame number of the active root (L2) table.
    pub const fn root(&self) -> Option<usize> {
        self.root
    }

    /// Physical address of the active root table, as loaded into CR3.
    pub fn root_address(&self) -> Option<usize> {
        self.root.map(frame_address)
    }

    /// Install `pfn` as the active root, returning the previous one.
    pub(crate) fn replace_root(&mut self, pfn: usize) -> Option<usize> {
        self.root.replace(pfn)
    }

    pub const fn perdomain_pt(&self) -> usize {
        self.perdomain_pt
    }

    pub const fn state(&self) -> DomainState {
        self.state
    }

    pub fn is_dying(&self) -> bool {
        matches!(self.state, DomainState::Dying(_))
    }

    pub(crate) fn mark_dying(&mut self, fault: BatchFault) {
        if !self.is_dying() {
            self.state = DomainState::Dying(fault);
        }
    }
}
