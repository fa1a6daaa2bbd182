use hv_error::define_kernel_error;

define_kernel_error! {
    /// Reasons a page-table operation is refused.
    ///
    /// Any of these reaching the dispatcher is fatal to the calling domain.
    pub enum MmError(0x02) {
        /// Frame number past the end of the frame table
        OutOfRange = 0x01 => "Frame number out of range",
        /// Frame is owned by another domain (or by nobody)
        DomainMismatch = 0x02 => "Frame owned by another domain",
        /// Frame is in use with a different type, or has no reference of the requested type
        TypeConflict = 0x03 => "Frame type conflict",
        /// Entry sets global, large-page or PAT bits
        BadHardwareBits = 0x04 => "Disallowed page table entry bits",
        /// Pin requested on a frame that is already pinned
        AlreadyPinned = 0x05 => "Frame already pinned",
        /// Unpin requested on a frame that is not pinned
        NotPinned = 0x06 => "Frame not pinned",
        /// Unknown extended command
        InvalidCommand = 0x07 => "Invalid extended command",
        /// L2 update aimed at a hypervisor-reserved slot
        ReservedSlot = 0x08 => "Update targets hypervisor-reserved slot",
        /// Normal or unchecked update aimed at a frame that is not a page table
        NotPageTable = 0x09 => "Update target is not a page table",
        /// Request address selects no known lane
        InvalidLane = 0x0A => "Invalid update request lane",
        /// Free list exhausted
        OutOfMemory = 0x0B => "No free frames",
        /// Frame still referenced and cannot return to the free list
        FrameInUse = 0x0C => "Frame still referenced",
        /// Domain is being destroyed and accepts no more updates
        DomainDying = 0x0D => "Domain is dying",
    }
}
