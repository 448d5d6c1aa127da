//! # Typed Addresses
//!
//! Zero-cost wrappers that keep virtual addresses, virtual pages, physical
//! addresses and physical frame numbers apart at compile time. Only 4 KiB
//! granularity exists here; the layer does not track huge pages.
//!
//! ```rust
//! # use kernel_rmap::addresses::*;
//! let va = VirtualAddress::new(0x0000_7FFF_1234_5678);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x0000_7FFF_1234_5000);
//! assert_eq!(page.join(va.offset()).as_u64(), va.as_u64());
//!
//! let pa = PhysicalAddress::new(0x0012_3456);
//! assert_eq!(pa.frame().as_u64(), 0x123);
//! assert_eq!(pa.frame().base().as_u64(), 0x0012_3000);
//! ```

use core::fmt;

/// log2 of the page size.
pub const PAGE_SHIFT: u32 = 12;

/// Page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

const OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Number of implemented virtual address bits (4-level paging).
const VA_BITS: u32 = 48;

/// A raw virtual address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing(self)
    }

    /// Byte offset within the containing page.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    /// Whether bits 63..=47 are a sign extension of bit 47.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> (VA_BITS - 1);
        upper == 0 || upper == (u64::MAX >> (VA_BITS - 1))
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#018X})", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(addr: u64) -> Self {
        Self::new(addr)
    }
}

/// Page-aligned virtual address.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    /// Page that contains `addr` (aligns down to page boundary).
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self(addr.0 & !OFFSET_MASK)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Virtual page number (base >> [`PAGE_SHIFT`]).
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// Combines the base with an in-page offset (masked to the page).
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        VirtualAddress(self.0 | (offset & OFFSET_MASK))
    }

    /// The page `n` pages above this one, if it does not overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        match n.checked_mul(PAGE_SIZE) {
            Some(delta) => match self.0.checked_add(delta) {
                Some(base) => Some(Self(base)),
                None => None,
            },
            None => None,
        }
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0)
    }
}

impl TryFrom<VirtualAddress> for VirtualPage {
    type Error = ();

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, ()> {
        if va.offset() == 0 {
            Ok(va.page())
        } else {
            Err(())
        }
    }
}

/// A raw physical address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> FrameNumber {
        FrameNumber(self.0 >> PAGE_SHIFT)
    }

    /// This address with the in-page offset cleared.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(self.0 & !OFFSET_MASK)
    }

    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#018X})", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(addr: u64) -> Self {
        Self::new(addr)
    }
}

/// Physical frame number: physical page base divided by [`PAGE_SIZE`].
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Frame number as an array index, if it fits `usize`.
    #[inline]
    #[must_use]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    /// Physical base address of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0 << PAGE_SHIFT)
    }

    /// Full physical address for an in-page offset.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        PhysicalAddress((self.0 << PAGE_SHIFT) | (offset & OFFSET_MASK))
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl TryFrom<usize> for FrameNumber {
    type Error = core::num::TryFromIntError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        u64::try_from(index).map(Self)
    }
}
