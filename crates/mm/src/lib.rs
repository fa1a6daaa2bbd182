//! Guest page-table update validation.
//!
//! Guests never write their page tables directly. They hand the hypervisor
//! batches of `(ptr, val)` requests; this crate checks each one against the
//! per-frame reference counts and either applies it or reports the violation
//! so the caller can destroy the offending domain.
//!
//! Layering, leaves first:
//! - [`frame`]: frame descriptor store and free list
//! - [`refcount`]: type/total reference counting with type exclusivity
//! - [`validate`]: recursive acquire/release of L1, L2 and leaf references
//! - [`modify`]: transactional single-entry updates
//! - [`extended`]: pin, unpin, root switch and TLB commands
//! - [`dispatch`]: batch demultiplexing and per-batch flush coalescing
//! - [`executor`]: termination policy on top of the dispatcher
//!
//! The core takes no locks. Callers serialize access to a domain's tables,
//! typically by holding the [`hv_utils::Mutex`] wrapping the [`MemoryManager`]
//! for the length of a batch (see [`executor::BatchExecutor`]).

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod entry;
pub mod error;
pub mod executor;
pub mod extended;
pub mod frame;
pub mod layout;
pub mod manager;
pub mod memory;
pub mod modify;
pub mod refcount;
pub mod tlb;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{MmConfig, UncheckedPolicy};
pub use dispatch::{BatchFault, PageUpdateRequest, UpdateLane};
pub use domain::{Domain, DomainState};
pub use entry::{PageTable, PageTableEntry, PteFlags};
pub use error::MmError;
pub use executor::{BatchExecutor, DomainControl};
pub use extended::ExtCommand;
pub use frame::{DomainId, FrameDescriptor, FrameTable, PageType};
pub use manager::MemoryManager;
pub use memory::{FrameArena, PhysMemory};
pub use tlb::{ArchTlb, CpuContext, Tlb};
