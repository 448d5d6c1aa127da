//! # Software Page Table
//!
//! A [`HardwarePageTable`] kept entirely in memory: an ordered map from
//! `(address space, virtual page)` to `(frame, flags)` behind one lock. Hosted
//! builds and the test suite use it as the source of truth the shadow tables
//! are checked against.
//!
//! Only leaves with the present bit set resolve through
//! [`walk`](HardwarePageTable::walk).

use crate::addresses::{FrameNumber, VirtualAddress, VirtualPage};
use crate::asid::AddressSpaceId;
use crate::collab::{HardwarePageTable, Translation};
use crate::flags::PageFlags;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_sync::SpinLock;

type Leaves = BTreeMap<(AddressSpaceId, VirtualPage), (FrameNumber, PageFlags)>;

/// See the [module documentation](self).
pub struct SoftPageTable {
    leaves: SpinLock<Leaves>,
}

impl Default for SoftPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftPageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            leaves: SpinLock::named("pgdir", BTreeMap::new()),
        }
    }

    /// Installs `page(va) → frame` in `space`, replacing any previous leaf.
    /// Returns the replaced leaf as a translation of `va`.
    pub fn map(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) -> Option<Translation> {
        let previous = self
            .leaves
            .with_lock(|leaves| leaves.insert((space, va.page()), (frame, flags)));
        previous.map(|(frame, flags)| leaf(va, frame, flags))
    }

    /// Drops every leaf of `space`, returning `(page, frame)` for each, in
    /// ascending page order.
    pub fn destroy(&self, space: AddressSpaceId) -> Vec<(VirtualPage, FrameNumber)> {
        let mut dropped = Vec::new();
        self.leaves.with_lock(|leaves| {
            leaves.retain(|&(owner, page), &mut (frame, _)| {
                if owner == space {
                    dropped.push((page, frame));
                    false
                } else {
                    true
                }
            });
        });
        dropped
    }

    /// Every leaf of `space` in ascending page order.
    #[must_use]
    pub fn mappings_of(&self, space: AddressSpaceId) -> Vec<(VirtualPage, FrameNumber, PageFlags)> {
        self.leaves.with_lock(|leaves| {
            leaves
                .iter()
                .filter(|((owner, _), _)| *owner == space)
                .map(|(&(_, page), &(frame, flags))| (page, frame, flags))
                .collect()
        })
    }

    /// Total number of leaves across all address spaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.with_lock(|leaves| leaves.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HardwarePageTable for SoftPageTable {
    fn walk(&self, space: AddressSpaceId, va: VirtualAddress) -> Option<Translation> {
        let (frame, flags) = self
            .leaves
            .with_lock(|leaves| leaves.get(&(space, va.page())).copied())?;
        flags.present().then(|| leaf(va, frame, flags))
    }

    fn unmap(&self, space: AddressSpaceId, va: VirtualAddress) -> Option<Translation> {
        self.leaves
            .with_lock(|leaves| leaves.remove(&(space, va.page())))
            .map(|(frame, flags)| leaf(va, frame, flags))
    }

    fn change_protection(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Option<Translation> {
        self.leaves.with_lock(|leaves| {
            let (frame, current) = leaves.get_mut(&(space, va.page()))?;
            *current = flags;
            Some(leaf(va, *frame, flags))
        })
    }
}

#[inline]
const fn leaf(va: VirtualAddress, frame: FrameNumber, flags: PageFlags) -> Translation {
    Translation {
        physical: frame.join(va.offset()),
        flags,
    }
}
