//! # Collaborator Interfaces
//!
//! The reverse-mapping layer shadows state it does not own. These traits name
//! the three subsystems it reads from:
//!
//! - [`HardwarePageTable`]: the real mappings, and the source of truth for
//!   [`translate`](crate::diag::translate).
//! - [`ProcessTable`]: resolves an address space to the process running in it.
//! - [`FrameDirectory`]: the physical frame allocator and its per-frame
//!   bookkeeping.
//!
//! All methods take `&self`; implementations carry their own locks. None of
//! them is ever called while an IPT or STLB lock is held.

use crate::addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use crate::asid::AddressSpaceId;
use crate::flags::PageFlags;
use alloc::vec::Vec;
use core::fmt;

/// Process identifier as reported by the diagnostics.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// A resolved leaf mapping: the full physical address for the queried
/// virtual address, and the leaf's flags.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Translation {
    pub physical: PhysicalAddress,
    pub flags: PageFlags,
}

impl Translation {
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameNumber {
        self.physical.frame()
    }
}

/// One record of [`FrameDirectory::snapshot`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub frame_index: usize,
    pub allocated: bool,
    /// Owner recorded at allocation; `None` when free or kernel-owned.
    pub owner: Option<Pid>,
    /// Tick at which the frame was last allocated; 0 when free.
    pub start_tick: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameDirectoryError {
    #[error("frame {frame} outside the directory of {frames} frames")]
    OutOfRange { frame: FrameNumber, frames: usize },
    #[error("frame {0} is not allocated")]
    NotAllocated(FrameNumber),
}

/// Leaf-level view of the hardware page tables.
pub trait HardwarePageTable {
    /// Resolves `va` in `space`; `None` if no present leaf maps it.
    fn walk(&self, space: AddressSpaceId, va: VirtualAddress) -> Option<Translation>;

    /// Removes the leaf mapping the page of `va`, returning what it mapped.
    fn unmap(&self, space: AddressSpaceId, va: VirtualAddress) -> Option<Translation>;

    /// Replaces the flags of the leaf mapping the page of `va`. Returns the
    /// updated translation, or `None` if nothing was mapped.
    fn change_protection(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Option<Translation>;
}

/// Maps address spaces back to processes.
pub trait ProcessTable {
    /// The process currently running in `space`, if any.
    fn lookup_by_space(&self, space: AddressSpaceId) -> Option<Pid>;
}

/// The physical frame allocator's bookkeeping.
pub trait FrameDirectory {
    /// Hands out a free frame, recording `owner` and `tick`. `None` when out
    /// of frames.
    fn alloc(&self, owner: Option<Pid>, tick: u64) -> Option<FrameNumber>;

    /// Returns `frame` to the free pool.
    ///
    /// # Errors
    /// Out-of-range frames and frames that are not allocated.
    fn free(&self, frame: FrameNumber) -> Result<(), FrameDirectoryError>;

    /// Owner recorded for an allocated frame.
    ///
    /// # Errors
    /// Out-of-range frames and frames that are not allocated.
    fn owner_of(&self, frame: FrameNumber) -> Result<Option<Pid>, FrameDirectoryError>;

    /// Number of frames the directory describes.
    fn frame_count(&self) -> usize;

    /// Up to `max` records, starting at frame 0, in index order.
    fn snapshot(&self, max: usize) -> Vec<FrameInfo>;
}
