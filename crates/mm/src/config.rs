/// Precondition applied to the unchecked-update lane.
///
/// The lane lets the control domain poke a raw value into one of its own L1
/// tables with no reference counting. Two readings of the gate exist and both
/// are kept selectable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UncheckedPolicy {
    /// Pack the descriptor's owner and type into one flags word, OR in the
    /// caller's id, and require the result to equal the bare L1 type tag.
    /// Passes only when caller id, owner id and every other flag bit are zero.
    Literal,
    /// Caller is the control domain, owns the frame, and the frame is
    /// currently an L1 table. Checked as three separate conditions.
    #[default]
    Strict,
}

/// Boot-time configuration for the memory manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmConfig {
    /// Physical frames covered by the frame table
    pub nr_frames: usize,
    /// Frames at the bottom of memory held by the hypervisor image and the
    /// frame table itself; never placed on the free list
    pub reserved_frames: usize,
    /// Gate for the unchecked-update lane
    pub unchecked_policy: UncheckedPolicy,
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            nr_frames: 1024,
            reserved_frames: 16,
            unchecked_policy: UncheckedPolicy::default(),
        }
    }
}

impl MmConfig {
    pub const fn new(nr_frames: usize, reserved_frames: usize) -> Self {
        Self {
            nr_frames,
            reserved_frames,
            unchecked_policy: UncheckedPolicy::Strict,
        }
    }

    #[must_use]
    pub const fn with_unchecked_policy(mut self, policy: UncheckedPolicy) -> Self {
        self.unchecked_policy = policy;
        self
    }

    /// Frames handed to the free list at boot.
    pub const fn allocatable_frames(&self) -> usize {
        self.nr_frames.saturating_sub(self.reserved_frames)
    }
}
