//! # Reverse Mapping and Translation Caching
//!
//! Kernel-side bookkeeping that shadows the hardware page tables:
//!
//! - an [inverse page table](ipt) answering "which address spaces map this
//!   physical frame, and at which virtual page?", with one reference count per
//!   frame;
//! - a [software TLB](stlb) caching `(address space, page) → physical page`
//!   so repeated translations skip the page-table walk;
//! - a [translation and diagnostic surface](diag) over both, plus the
//!   [`MappingTracker`] hooks that the fault, fork, unmap and exit paths call
//!   on every mapping change.
//!
//! ```text
//!  fault / fork / unmap / exit
//!             │  on_map, on_unmap, on_protection_change,
//!             │  on_address_space_destroyed
//!             ▼
//!      ┌──────────────┐
//!      │MappingTracker│
//!      └──┬────────┬──┘
//!         ▼        ▼
//!       [IPT]    [STLB] ◄── translate_cached ──► HardwarePageTable::walk
//!         │
//!         └──► reverse_lookup ──► ProcessTable::lookup_by_space
//! ```
//!
//! ## Consistency rules
//!
//! - `refcount_of(frame)` equals the number of live IPT entries for `frame`
//!   between any two operations.
//! - A software TLB hit for `(space, va)` implies a live hardware mapping of
//!   that page to the cached frame. Every unmap, remap and protection change
//!   must therefore go through the tracker before anyone can translate again.
//!   A cache fill that races such a change is dropped, not stored.
//! - At address-space teardown both tables are purged of the space before its
//!   frames are freed. Address-space handles are never reused
//!   ([`AsidAllocator`]), so a missed purge cannot alias a newer process.
//!
//! Running out of table slots is never an error for the mapping change being
//! shadowed: the hooks log it, count it, and carry on with a less complete
//! picture.
//!
//! ## Locking
//!
//! The IPT and the software TLB each sit behind one table-wide
//! [`SpinLock`](kernel_sync::SpinLock). No code path in this crate holds both,
//! or holds either while calling into a collaborator.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod addresses;
pub mod asid;
mod chain;
pub mod collab;
pub mod config;
pub mod diag;
mod flags;
pub mod frame_table;
mod global;
mod hash;
pub mod ipt;
pub mod soft_page_table;
pub mod stlb;
mod tracker;

pub use crate::addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualPage};
pub use crate::asid::{AddressSpaceId, AsidAllocator, AsidError};
pub use crate::collab::{
    FrameDirectory, FrameDirectoryError, FrameInfo, HardwarePageTable, Pid, ProcessTable,
    Translation,
};
pub use crate::config::{ConfigError, REVERSE_LOOKUP_MAX, RmapConfig, TableConfig};
pub use crate::diag::{
    ReverseMapping, TranslateError, dump_frame_directory, reverse_lookup, translate,
};
pub use crate::flags::{PTE_FLAGS_MASK, PageFlags};
pub use crate::frame_table::FrameTable;
pub use crate::global::{InitError, init, tracker};
pub use crate::hash::{frame_bucket, space_page_bucket};
pub use crate::ipt::{FrameMapping, InsertOutcome, InversePageTable, InvariantViolation, IptError};
pub use crate::soft_page_table::SoftPageTable;
pub use crate::stlb::{CachedTranslation, SoftwareTlb, StlbError, StlbStats};
pub use crate::tracker::{MappingTracker, TeardownReport};
