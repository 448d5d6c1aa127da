//! # Mapping Hooks
//!
//! [`MappingTracker`] owns one [`InversePageTable`] and one [`SoftwareTlb`]
//! and exposes the hooks the fault, fork, unmap and exit paths call on every
//! change to a hardware mapping. The hooks never fail: a table that cannot
//! record a mapping logs it, bumps
//! [`degraded_inserts`](MappingTracker::degraded_inserts) and lets the mapping
//! change proceed.
//!
//! Each hook takes the IPT lock and the STLB lock one after the other, never
//! both at once.
//!
//! ## Caller contract
//! - A page whose frame changes (COW break, remap) is reported as
//!   [`on_unmap`](MappingTracker::on_unmap) of the old frame followed by
//!   [`on_map`](MappingTracker::on_map) of the new one.
//! - [`on_address_space_destroyed`](MappingTracker::on_address_space_destroyed)
//!   must return before any frame of the dying address space goes back to the
//!   frame directory.

use crate::addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use crate::asid::AddressSpaceId;
use crate::collab::{HardwarePageTable, ProcessTable, Translation};
use crate::config::{ConfigError, RmapConfig};
use crate::diag::{self, ReverseMapping, TranslateError};
use crate::flags::PageFlags;
use crate::ipt::{InsertOutcome, InversePageTable};
use crate::stlb::SoftwareTlb;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use log::{debug, trace};

/// What [`MappingTracker::on_address_space_destroyed`] removed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    pub ipt_removed: usize,
    pub stlb_invalidated: usize,
}

/// See the [module documentation](self).
pub struct MappingTracker {
    ipt: InversePageTable,
    stlb: SoftwareTlb,
    degraded: AtomicU64,
}

impl MappingTracker {
    /// # Errors
    /// Returns the [`ConfigError`] of an invalid `config`.
    pub fn new(config: &RmapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ipt: InversePageTable::new(&config.ipt, config.max_frames)?,
            stlb: SoftwareTlb::new(&config.stlb)?,
            degraded: AtomicU64::new(0),
        })
    }

    #[inline]
    #[must_use]
    pub const fn ipt(&self) -> &InversePageTable {
        &self.ipt
    }

    #[inline]
    #[must_use]
    pub const fn stlb(&self) -> &SoftwareTlb {
        &self.stlb
    }

    /// Number of inserts into either table that were dropped since
    /// construction.
    #[must_use]
    pub fn degraded_inserts(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    /// `space` now maps the page of `va` to `frame` with `flags`.
    ///
    /// Any cached translation for the page is dropped; the next
    /// [`translate_cached`](Self::translate_cached) refills it.
    pub fn on_map(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) {
        trace!("map {space} {} -> frame {frame} [{flags}]", va.page());
        if self.ipt.insert(frame, space, va, flags).is_err() {
            self.degrade();
        }
        self.stlb.invalidate_one(space, va);
    }

    /// `space` no longer maps the page of `va` to `frame`. Returns the number
    /// of IPT entries removed.
    pub fn on_unmap(&self, space: AddressSpaceId, va: VirtualAddress, frame: FrameNumber) -> usize {
        trace!("unmap {space} {} (frame {frame})", va.page());
        self.stlb.invalidate_one(space, va);
        self.ipt.remove(frame, space, va)
    }

    /// The leaf for the page of `va` keeps `frame` but now carries `flags`.
    pub fn on_protection_change(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: PageFlags,
    ) {
        trace!("protect {space} {} -> [{flags}]", va.page());
        match self.ipt.insert(frame, space, va, flags) {
            Ok(InsertOutcome::Refreshed) => {}
            Ok(InsertOutcome::Inserted) => {
                debug!("protect {space} {}: mapping was not tracked, now is", va.page());
            }
            Err(_) => self.degrade(),
        }
        self.stlb.invalidate_one(space, va);
    }

    /// Purges every trace of `space` from both tables.
    pub fn on_address_space_destroyed(&self, space: AddressSpaceId) -> TeardownReport {
        let ipt_removed = self.ipt.remove_all_of(space);
        let stlb_invalidated = self.stlb.invalidate_all_of(space);
        debug!(
            "teardown {space}: {ipt_removed} reverse mappings, \
             {stlb_invalidated} cached translations"
        );
        TeardownReport {
            ipt_removed,
            stlb_invalidated,
        }
    }

    /// Translates through the software TLB, walking `tables` and caching the
    /// result on a miss.
    ///
    /// The walk runs without any table lock. If a hook invalidates the cache
    /// while it runs, the walk's result is returned but not cached.
    ///
    /// # Errors
    /// As [`diag::translate`].
    pub fn translate_cached<P>(
        &self,
        tables: &P,
        space: AddressSpaceId,
        va: VirtualAddress,
    ) -> Result<Translation, TranslateError>
    where
        P: HardwarePageTable + ?Sized,
    {
        if !va.is_canonical() {
            return Err(TranslateError::Malformed(va));
        }
        let epoch = self.stlb.epoch();
        if let Some(hit) = self.stlb.lookup(space, va) {
            return Ok(Translation {
                physical: hit.physical_page.frame().join(va.offset()),
                flags: hit.flags,
            });
        }

        let t = diag::translate(tables, space, va)?;
        if self
            .stlb
            .insert_if_unchanged(epoch, space, va, t.physical, t.flags)
            .is_err()
        {
            self.degrade();
        }
        Ok(t)
    }

    /// [`diag::reverse_lookup`] over this tracker's IPT.
    #[must_use]
    pub fn reverse_lookup<T>(
        &self,
        processes: &T,
        pa: PhysicalAddress,
        max: usize,
    ) -> Vec<ReverseMapping>
    where
        T: ProcessTable + ?Sized,
    {
        diag::reverse_lookup(&self.ipt, processes, pa, max)
    }
}
