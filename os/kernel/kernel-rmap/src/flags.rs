//! Leaf page-table entry flags, as recorded in both tables.

use bitfield_struct::bitfield;
use core::fmt;

/// Mask of the flag bits carried in the low bits of a page-table entry.
pub const PTE_FLAGS_MASK: u64 = 0xFFF;

/// Snapshot of the low 12 bits of a leaf page-table entry.
///
/// This is what both the inverse page table and the software TLB record per
/// mapping: the hardware walk produces it, and the diagnostics report it back
/// verbatim. The layout follows the x86 PTE:
///
/// | Bit  | Field            |
/// |------|------------------|
/// | 0    | `present`        |
/// | 1    | `writable`       |
/// | 2    | `user`           |
/// | 3    | `write_through`  |
/// | 4    | `cache_disabled` |
/// | 5    | `accessed`       |
/// | 6    | `dirty`          |
/// | 7    | `large_page`     |
/// | 8    | `global`         |
/// | 9-11 | `os_available`   |
///
/// ```rust
/// # use kernel_rmap::PageFlags;
/// let f = PageFlags::user_data();
/// assert!(f.present() && f.writable() && f.user());
/// assert_eq!(f.into_bits(), 0x7);
/// assert_eq!(PageFlags::from_pte(0x8000_0000_0012_3065).into_bits(), 0x065);
/// ```
#[bitfield(u16, order = Lsb)]
#[derive(Eq, PartialEq, Hash)]
pub struct PageFlags {
    /// Bit 0: Present (P).
    pub present: bool,
    /// Bit 1: Read/Write (RW).
    pub writable: bool,
    /// Bit 2: User/Supervisor (US).
    pub user: bool,
    /// Bit 3: Page Write-Through (PWT).
    pub write_through: bool,
    /// Bit 4: Page Cache Disable (PCD).
    pub cache_disabled: bool,
    /// Bit 5: Accessed (A).
    pub accessed: bool,
    /// Bit 6: Dirty (D).
    pub dirty: bool,
    /// Bit 7: Page Size (PS); always clear for the 4 KiB leaves tracked here.
    pub large_page: bool,
    /// Bit 8: Global (G).
    pub global: bool,
    /// Bits 9-11: available to the OS (e.g. COW marker).
    #[bits(3)]
    pub os_available: u8,
    #[bits(4)]
    __: u8,
}

impl PageFlags {
    /// Extracts the flag bits from a raw PTE, discarding the frame address
    /// and the high control bits (NX, protection keys).
    #[inline]
    #[must_use]
    pub fn from_pte(raw: u64) -> Self {
        Self::from_bits(u16::try_from(raw & PTE_FLAGS_MASK).unwrap_or_default())
    }

    /// `P | W | U`: heap, stack and data pages.
    #[inline]
    #[must_use]
    pub const fn user_data() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
    }

    /// `P | U`: read-only user pages such as program text or a COW share.
    #[inline]
    #[must_use]
    pub const fn user_read_only() -> Self {
        Self::new().with_present(true).with_user(true)
    }

    /// `P | W`: supervisor-only pages.
    #[inline]
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::new().with_present(true).with_writable(true)
    }
}

impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}{}{}{} ({:#05x})",
            bit(self.present(), 'P'),
            bit(self.writable(), 'W'),
            bit(self.user(), 'U'),
            bit(self.write_through(), 'T'),
            bit(self.cache_disabled(), 'C'),
            bit(self.accessed(), 'A'),
            bit(self.dirty(), 'D'),
            bit(self.large_page(), 'S'),
            bit(self.global(), 'G'),
            self.into_bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_pte_layout() {
        assert_eq!(PageFlags::new().with_present(true).into_bits(), 0x001);
        assert_eq!(PageFlags::new().with_writable(true).into_bits(), 0x002);
        assert_eq!(PageFlags::new().with_user(true).into_bits(), 0x004);
        assert_eq!(PageFlags::new().with_dirty(true).into_bits(), 0x040);
        assert_eq!(PageFlags::new().with_global(true).into_bits(), 0x100);
        assert_eq!(PageFlags::new().with_os_available(0b101).into_bits(), 0xA00);
    }

    #[test]
    fn from_pte_drops_address_and_nx() {
        let raw = (1u64 << 63) | 0x0000_0001_2345_6000 | 0x027;
        let f = PageFlags::from_pte(raw);
        assert_eq!(f.into_bits(), 0x027);
        assert!(f.present() && f.writable() && f.user() && f.accessed());
    }

    #[test]
    fn presets() {
        let ro = PageFlags::user_read_only();
        assert!(ro.present() && ro.user() && !ro.writable());
        let k = PageFlags::kernel_data();
        assert!(k.present() && !k.user());
    }

    #[test]
    fn display_lists_set_bits() {
        let s = alloc::format!("{}", PageFlags::user_data());
        assert!(s.starts_with("PWU------"), "{s}");
    }
}
