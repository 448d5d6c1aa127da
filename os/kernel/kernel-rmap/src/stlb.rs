//! # Software TLB
//!
//! A hash-indexed cache `(address space, virtual page) → (physical page,
//! flags)` in front of the hardware page-table walk.
//!
//! The cache has no expiry and no background reconciliation: an entry is
//! correct from the moment it is inserted until someone invalidates it.
//! Consequently every path that unmaps, remaps or re-protects a page must call
//! [`invalidate_one`](SoftwareTlb::invalidate_one) before anything can read
//! the cache again, and address-space teardown must call
//! [`invalidate_all_of`](SoftwareTlb::invalidate_all_of). A hit for a page
//! that is no longer mapped is the failure this discipline exists to prevent.
//!
//! A miss is filled from a page-table walk that runs without the cache lock,
//! so an unmap can slip in between the walk and the fill. Every invalidation
//! bumps an epoch; a filler reads [`epoch`](SoftwareTlb::epoch) before walking
//! and hands it to [`insert_if_unchanged`](SoftwareTlb::insert_if_unchanged),
//! which refuses the fill once any invalidation has happened since.
//!
//! Buckets are selected by [`space_page_bucket`]; all state, including the
//! hit/miss counters and the epoch, sits behind one table-wide spin lock.

use crate::addresses::{PhysicalAddress, VirtualAddress, VirtualPage};
use crate::asid::AddressSpaceId;
use crate::chain::BucketChains;
use crate::config::{ConfigError, TableConfig};
use crate::flags::PageFlags;
use crate::hash::space_page_bucket;
use core::fmt;
use kernel_sync::SpinLock;
use log::{debug, info, trace, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct StlbEntry {
    space: AddressSpaceId,
    page: VirtualPage,
    physical_page: PhysicalAddress,
    flags: PageFlags,
}

impl StlbEntry {
    #[inline]
    fn is(&self, space: AddressSpaceId, page: VirtualPage) -> bool {
        self.space == space && self.page == page
    }
}

/// A cache hit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CachedTranslation {
    /// Page-aligned physical address the virtual page maps to.
    pub physical_page: PhysicalAddress,
    pub flags: PageFlags,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StlbError {
    #[error("software TLB full ({capacity} entries)")]
    Exhausted { capacity: usize },
}

/// Monotonic lookup counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StlbStats {
    pub hits: u64,
    pub misses: u64,
}

impl StlbStats {
    #[must_use]
    pub const fn lookups(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }

    /// Hits as an integer percentage of all lookups; 0 before the first one.
    #[must_use]
    pub const fn hit_rate_percent(&self) -> u64 {
        match self.lookups() {
            0 => 0,
            total => self.hits.saturating_mul(100) / total,
        }
    }
}

impl fmt::Display for StlbStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={}%",
            self.hits,
            self.misses,
            self.hit_rate_percent()
        )
    }
}

struct StlbInner {
    chains: BucketChains<StlbEntry>,
    stats: StlbStats,
    /// Bumped by every invalidation, hit or not.
    epoch: u64,
}

impl StlbInner {
    fn store(
        &mut self,
        space: AddressSpaceId,
        page: VirtualPage,
        physical_page: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), StlbError> {
        let bucket = space_page_bucket(space, page, self.chains.bucket_count());
        if let Some(existing) = self.chains.find_mut(bucket, |e| e.is(space, page)) {
            existing.physical_page = physical_page;
            existing.flags = flags;
            return Ok(());
        }

        let entry = StlbEntry {
            space,
            page,
            physical_page,
            flags,
        };
        self.chains
            .push_front(bucket, entry)
            .map_err(|_| StlbError::Exhausted {
                capacity: self.chains.capacity(),
            })
    }

    #[inline]
    const fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// The software TLB. See the [module documentation](self).
pub struct SoftwareTlb {
    inner: SpinLock<StlbInner>,
}

impl SoftwareTlb {
    /// # Errors
    /// Returns the [`ConfigError`] of an invalid `config`.
    pub fn new(config: &TableConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: SpinLock::named(
                "softtlb",
                StlbInner {
                    chains: BucketChains::new(config.buckets, config.capacity),
                    stats: StlbStats::default(),
                    epoch: 0,
                },
            ),
        })
    }

    /// Cached translation of the page containing `va`, counting a hit or a
    /// miss.
    #[must_use]
    pub fn lookup(&self, space: AddressSpaceId, va: VirtualAddress) -> Option<CachedTranslation> {
        let page = va.page();
        let mut guard = self.inner.lock();
        let StlbInner { chains, stats, .. } = &mut *guard;
        let bucket = space_page_bucket(space, page, chains.bucket_count());

        let found = chains
            .bucket(bucket)
            .find(|e| e.is(space, page))
            .map(|e| CachedTranslation {
                physical_page: e.physical_page,
                flags: e.flags,
            });
        match found {
            Some(_) => stats.hits = stats.hits.saturating_add(1),
            None => stats.misses = stats.misses.saturating_add(1),
        }
        found
    }

    /// Caches `page(va) → page(pa)` for `space`, overwriting an existing
    /// entry for the same key.
    ///
    /// Only safe when nothing can unmap the page concurrently; fills that
    /// follow an unlocked walk go through
    /// [`insert_if_unchanged`](Self::insert_if_unchanged).
    ///
    /// # Errors
    /// [`StlbError::Exhausted`] when no slot is free; the cache is unchanged
    /// and later lookups simply miss.
    pub fn insert(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), StlbError> {
        let page = va.page();
        let result = self.inner.lock().store(space, page, pa.page_base(), flags);
        if let Err(StlbError::Exhausted { capacity }) = result {
            warn!("softtlb: full ({capacity} entries); not caching {space} {page}");
        }
        result
    }

    /// Current invalidation epoch. Read it before the walk whose result is
    /// later passed to [`insert_if_unchanged`](Self::insert_if_unchanged).
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.with_lock(|inner| inner.epoch)
    }

    /// Like [`insert`](Self::insert), but only if no invalidation happened
    /// since `epoch` was read. Returns whether the entry was stored.
    ///
    /// # Errors
    /// [`StlbError::Exhausted`] when no slot is free.
    pub fn insert_if_unchanged(
        &self,
        epoch: u64,
        space: AddressSpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<bool, StlbError> {
        let page = va.page();
        let mut guard = self.inner.lock();
        if guard.epoch != epoch {
            drop(guard);
            trace!("softtlb: {space} {page} invalidated during fill; not caching");
            return Ok(false);
        }
        let result = guard.store(space, page, pa.page_base(), flags);
        drop(guard);
        if let Err(StlbError::Exhausted { capacity }) = result {
            warn!("softtlb: full ({capacity} entries); not caching {space} {page}");
        }
        result.map(|()| true)
    }

    /// Drops the entry for the page containing `va`, if cached.
    pub fn invalidate_one(&self, space: AddressSpaceId, va: VirtualAddress) -> bool {
        let page = va.page();
        let mut guard = self.inner.lock();
        guard.bump_epoch();
        let chains = &mut guard.chains;
        let bucket = space_page_bucket(space, page, chains.bucket_count());
        chains.remove_where(bucket, |e| e.is(space, page), drop) > 0
    }

    /// Drops every entry of `space`. Walks the whole cache.
    pub fn invalidate_all_of(&self, space: AddressSpaceId) -> usize {
        let removed = self.inner.with_lock(|inner| {
            inner.bump_epoch();
            inner.chains.remove_all_where(|e| e.space == space, drop)
        });
        debug!("softtlb: invalidated {removed} entries of {space}");
        removed
    }

    #[must_use]
    pub fn stats(&self) -> StlbStats {
        self.inner.with_lock(|inner| inner.stats)
    }

    pub fn reset_stats(&self) {
        self.inner.with_lock(|inner| inner.stats = StlbStats::default());
    }

    /// Emits the current counters at `info` level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!("softtlb: {stats}");
    }

    /// Number of cached translations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.with_lock(|inner| inner.chains.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any entry of `space` is cached. Walks the whole cache.
    #[must_use]
    pub fn holds_any_of(&self, space: AddressSpaceId) -> bool {
        self.inner
            .with_lock(|inner| inner.chains.iter().any(|e| e.space == space))
    }
}
