//! # Address-Space Handles
//!
//! The shadow tables key everything by the owning address space. Rather than
//! a page-table root pointer, which the allocator may hand out again after
//! the process dies, owners are named by an opaque [`AddressSpaceId`] drawn
//! from a monotonically increasing counter. A handle is never issued twice,
//! so a stale table entry can never be mistaken for a newer process.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of one address space (one page-table root).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressSpaceId(NonZeroU64);

impl AddressSpaceId {
    /// Wraps a raw handle; `None` for zero.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressSpaceId({})", self.0)
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("address-space handles exhausted")]
pub struct AsidError;

/// Issues fresh [`AddressSpaceId`]s; never recycles one.
#[derive(Debug)]
pub struct AsidAllocator {
    next: AtomicU64,
}

impl Default for AsidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AsidAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// # Errors
    /// Fails once the 64-bit handle space is used up; the counter is not
    /// allowed to wrap back onto handles that may still be referenced.
    pub fn allocate(&self) -> Result<AddressSpaceId, AsidError> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
            .and_then(AddressSpaceId::new)
            .ok_or(AsidError)
    }
}
