//! # Inverse Page Table
//!
//! Maps each physical frame to the set of `(address space, virtual page)`
//! pairs that currently map it, plus one global reference count per frame.
//!
//! ```text
//!   frame ──hash──► bucket ──► (frame, space, page, flags) ──► ...
//!
//!   refcounts[frame] == number of live entries for `frame`
//! ```
//!
//! Entries are hashed by frame number into a fixed number of chained buckets.
//! Every operation scans only the bucket of the frame it names, except
//! [`remove_all_of`](InversePageTable::remove_all_of), which walks the whole
//! table once at address-space teardown. All state sits behind a single
//! table-wide spin lock.
//!
//! The table never refuses to shadow a mapping in a way that affects the
//! mapping itself: an insert that cannot get a slot reports
//! [`IptError::Exhausted`] and leaves the table exactly as it was.

use crate::addresses::{FrameNumber, VirtualAddress, VirtualPage};
use crate::asid::AddressSpaceId;
use crate::chain::BucketChains;
use crate::config::{ConfigError, TableConfig};
use crate::flags::PageFlags;
use crate::hash::frame_bucket;
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use log::warn;

/// One reverse mapping: `space` maps `page` to `frame` with `flags`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IptEntry {
    pub frame: FrameNumber,
    pub space: AddressSpaceId,
    pub page: VirtualPage,
    pub flags: PageFlags,
}

impl IptEntry {
    #[inline]
    fn is(&self, frame: FrameNumber, space: AddressSpaceId, page: VirtualPage) -> bool {
        self.frame == frame && self.space == space && self.page == page
    }
}

/// A mapping of a frame as reported by [`InversePageTable::list_for_frame`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FrameMapping {
    pub space: AddressSpaceId,
    pub page: VirtualPage,
    pub flags: PageFlags,
    /// Global refcount of the frame at the time of the listing; identical for
    /// every mapping returned by one call.
    pub frame_refcount: u32,
}

/// What [`InversePageTable::insert`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// A new entry was linked and the frame's refcount went up by one.
    Inserted,
    /// The key already existed; only its flags were overwritten.
    Refreshed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IptError {
    #[error("inverse page table full ({capacity} entries)")]
    Exhausted { capacity: usize },
    #[error("frame {frame} outside the tracked range of {max_frames} frames")]
    FrameOutOfRange { frame: FrameNumber, max_frames: usize },
}

/// A broken table invariant, as found by
/// [`InversePageTable::check_invariants`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("frame {frame}: refcount {refcount} but {live} live entries")]
    RefcountMismatch {
        frame: FrameNumber,
        refcount: u32,
        live: u32,
    },
    #[error("duplicate entry for frame {frame}, {space}, page {page}")]
    DuplicateEntry {
        frame: FrameNumber,
        space: AddressSpaceId,
        page: VirtualPage,
    },
    #[error("entry for frame {0} outside the tracked range")]
    UntrackedFrame(FrameNumber),
}

struct IptInner {
    chains: BucketChains<IptEntry>,
    refcounts: Box<[u32]>,
}

/// The inverse page table. See the [module documentation](self).
pub struct InversePageTable {
    inner: SpinLock<IptInner>,
    max_frames: usize,
    /// Entry slots; no frame can have more mappings than this.
    capacity: usize,
}

impl InversePageTable {
    /// Reserves the buckets, entry slots and refcount array.
    ///
    /// # Errors
    /// Returns the [`ConfigError`] of an invalid `config` or a zero
    /// `max_frames`.
    pub fn new(config: &TableConfig, max_frames: usize) -> Result<Self, ConfigError> {
        config.validate()?;
        if max_frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        Ok(Self {
            inner: SpinLock::named(
                "ipt",
                IptInner {
                    chains: BucketChains::new(config.buckets, config.capacity),
                    refcounts: alloc::vec![0; max_frames].into_boxed_slice(),
                },
            ),
            max_frames,
            capacity: config.capacity,
        })
    }

    /// Frames `[0, max_frames)` are tracked.
    #[inline]
    #[must_use]
    pub const fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Records that `space` maps the page containing `va` to `frame`.
    ///
    /// Inserting an existing `(frame, space, page)` key overwrites its flags
    /// and leaves the refcount untouched.
    ///
    /// # Errors
    /// - [`IptError::FrameOutOfRange`] if `frame` is not tracked.
    /// - [`IptError::Exhausted`] if no entry slot is free.
    ///
    /// In both cases the table is unchanged.
    pub fn insert(
        &self,
        frame: FrameNumber,
        space: AddressSpaceId,
        va: VirtualAddress,
        flags: PageFlags,
    ) -> Result<InsertOutcome, IptError> {
        let page = va.page();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let bucket = frame_bucket(frame, inner.chains.bucket_count());

        if let Some(existing) = inner.chains.find_mut(bucket, |e| e.is(frame, space, page)) {
            existing.flags = flags;
            return Ok(InsertOutcome::Refreshed);
        }

        let Some(index) = frame.index().filter(|&i| i < inner.refcounts.len()) else {
            drop(guard);
            warn!("ipt: refusing {space} {page} -> frame {frame}: frame not tracked");
            return Err(IptError::FrameOutOfRange {
                frame,
                max_frames: self.max_frames,
            });
        };

        let entry = IptEntry {
            frame,
            space,
            page,
            flags,
        };
        if inner.chains.push_front(bucket, entry).is_err() {
            let capacity = inner.chains.capacity();
            drop(guard);
            warn!(
                "ipt: table full ({capacity} entries); {space} {page} -> frame {frame} untracked"
            );
            return Err(IptError::Exhausted { capacity });
        }
        // Saturation would mean more than u32::MAX mappings of one frame.
        inner.refcounts[index] = inner.refcounts[index].saturating_add(1);
        Ok(InsertOutcome::Inserted)
    }

    /// Removes every entry for exactly `(frame, space, page(va))`.
    ///
    /// Normally this is zero or one entry; stray duplicates are removed and
    /// counted too. The frame's refcount drops by the number removed, clamped
    /// at zero.
    pub fn remove(&self, frame: FrameNumber, space: AddressSpaceId, va: VirtualAddress) -> usize {
        let page = va.page();
        let mut guard = self.inner.lock();
        let IptInner { chains, refcounts } = &mut *guard;
        let bucket = frame_bucket(frame, chains.bucket_count());

        let removed = chains.remove_where(bucket, |e| e.is(frame, space, page), drop);
        if removed == 0 {
            return 0;
        }
        let clamped = frame
            .index()
            .and_then(|i| refcounts.get_mut(i))
            .is_some_and(|rc| release_refs(rc, removed));
        drop(guard);

        if clamped {
            warn!("ipt: refcount of frame {frame} clamped at zero removing {space} {page}");
        }
        removed
    }

    /// Removes every entry owned by `space`, across all frames.
    ///
    /// Must run, to completion, before any frame `space` held is handed out
    /// again and before the handle could be reissued.
    pub fn remove_all_of(&self, space: AddressSpaceId) -> usize {
        let mut clamped = 0_usize;
        let mut guard = self.inner.lock();
        let IptInner { chains, refcounts } = &mut *guard;

        let removed = chains.remove_all_where(
            |e| e.space == space,
            |e| {
                if let Some(rc) = e.frame.index().and_then(|i| refcounts.get_mut(i))
                    && release_refs(rc, 1)
                {
                    clamped += 1;
                }
            },
        );
        drop(guard);

        if clamped > 0 {
            warn!("ipt: {clamped} refcount(s) clamped at zero tearing down {space}");
        }
        log::debug!("ipt: removed {removed} entries of {space}");
        removed
    }

    /// Up to `limit` mappings of `frame`, in no particular order.
    ///
    /// The result buffer is reserved before the lock is taken, so the
    /// critical section itself does not allocate. The reservation never
    /// exceeds the table's entry capacity.
    #[must_use]
    pub fn list_for_frame(&self, frame: FrameNumber, limit: usize) -> Vec<FrameMapping> {
        let mut out = Vec::with_capacity(limit.min(self.capacity));
        if limit == 0 {
            return out;
        }

        let guard = self.inner.lock();
        let refcount = frame
            .index()
            .and_then(|i| guard.refcounts.get(i))
            .copied()
            .unwrap_or(0);
        let bucket = frame_bucket(frame, guard.chains.bucket_count());
        out.extend(
            guard
                .chains
                .bucket(bucket)
                .filter(|e| e.frame == frame)
                .take(limit)
                .map(|e| FrameMapping {
                    space: e.space,
                    page: e.page,
                    flags: e.flags,
                    frame_refcount: refcount,
                }),
        );
        out
    }

    /// Number of live mappings of `frame`; zero for untracked frames.
    #[must_use]
    pub fn refcount_of(&self, frame: FrameNumber) -> u32 {
        let Some(index) = frame.index() else {
            return 0;
        };
        self.inner
            .with_lock(|inner| inner.refcounts.get(index).copied().unwrap_or(0))
    }

    /// Whether the exact key `(frame, space, page(va))` is present.
    #[must_use]
    pub fn contains(&self, frame: FrameNumber, space: AddressSpaceId, va: VirtualAddress) -> bool {
        let page = va.page();
        let guard = self.inner.lock();
        let bucket = frame_bucket(frame, guard.chains.bucket_count());
        guard
            .chains
            .bucket(bucket)
            .any(|e| e.is(frame, space, page))
    }

    /// Number of entries owned by `space`. Walks the whole table.
    #[must_use]
    pub fn mappings_of(&self, space: AddressSpaceId) -> usize {
        self.inner
            .with_lock(|inner| inner.chains.iter().filter(|e| e.space == space).count())
    }

    /// Total number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.with_lock(|inner| inner.chains.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recomputes every frame's live entry count and compares it with the
    /// refcount array; also checks that no key appears twice.
    ///
    /// Walks the whole table under the lock. Meant for tests and debug
    /// self-checks, not for hot paths.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let guard = self.inner.lock();
        let mut live = alloc::vec![0_u32; guard.refcounts.len()];

        for bucket in 0..guard.chains.bucket_count() {
            for (n, e) in guard.chains.bucket(bucket).enumerate() {
                let Some(slot) = e.frame.index().and_then(|i| live.get_mut(i)) else {
                    return Err(InvariantViolation::UntrackedFrame(e.frame));
                };
                *slot += 1;
                if guard
                    .chains
                    .bucket(bucket)
                    .skip(n + 1)
                    .any(|other| other.is(e.frame, e.space, e.page))
                {
                    return Err(InvariantViolation::DuplicateEntry {
                        frame: e.frame,
                        space: e.space,
                        page: e.page,
                    });
                }
            }
        }

        for (index, (&refcount, &counted)) in guard.refcounts.iter().zip(live.iter()).enumerate() {
            if refcount != counted {
                let frame = FrameNumber::try_from(index).unwrap_or_default();
                return Err(InvariantViolation::RefcountMismatch {
                    frame,
                    refcount,
                    live: counted,
                });
            }
        }
        Ok(())
    }
}

/// Drops `n` references from `rc`; returns whether the decrement had to be
/// clamped at zero.
#[inline]
fn release_refs(rc: &mut u32, n: usize) -> bool {
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    let clamped = n > *rc;
    *rc = rc.saturating_sub(n);
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(n: u64) -> AddressSpaceId {
        AddressSpaceId::new(n).unwrap()
    }

    fn small() -> InversePageTable {
        InversePageTable::new(&TableConfig::new(8, 32), 64).unwrap()
    }

    #[test]
    fn insert_then_remove_exact_key() {
        let ipt = small();
        let f = FrameNumber::new(5);
        let va = VirtualAddress::new(0x4123);

        assert_eq!(
            ipt.insert(f, space(1), va, PageFlags::user_data()),
            Ok(InsertOutcome::Inserted)
        );
        assert_eq!(ipt.refcount_of(f), 1);
        assert!(ipt.contains(f, space(1), VirtualAddress::new(0x4000)));

        assert_eq!(ipt.remove(f, space(1), VirtualAddress::new(0x4FFF)), 1);
        assert_eq!(ipt.refcount_of(f), 0);
        assert!(ipt.list_for_frame(f, 8).is_empty());
        assert_eq!(ipt.check_invariants(), Ok(()));
    }

    #[test]
    fn reinsert_refreshes_flags_only() {
        let ipt = small();
        let f = FrameNumber::new(9);
        let va = VirtualAddress::new(0x7000);

        ipt.insert(f, space(1), va, PageFlags::user_data()).unwrap();
        assert_eq!(
            ipt.insert(f, space(1), va, PageFlags::user_read_only()),
            Ok(InsertOutcome::Refreshed)
        );

        let listed = ipt.list_for_frame(f, 8);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].flags, PageFlags::user_read_only());
        assert_eq!(ipt.refcount_of(f), 1);
    }

    #[test]
    fn colliding_frames_share_a_bucket_but_not_entries() {
        let ipt = small();
        // 8 buckets: frames 3 and 11 collide.
        let (a, b) = (FrameNumber::new(3), FrameNumber::new(11));
        ipt.insert(a, space(1), VirtualAddress::new(0x1000), PageFlags::user_data())
            .unwrap();
        ipt.insert(b, space(1), VirtualAddress::new(0x1000), PageFlags::user_data())
            .unwrap();

        assert_eq!(ipt.list_for_frame(a, 8).len(), 1);
        assert_eq!(ipt.remove(a, space(1), VirtualAddress::new(0x1000)), 1);
        assert_eq!(ipt.refcount_of(b), 1);
        assert!(ipt.contains(b, space(1), VirtualAddress::new(0x1000)));
    }

    #[test]
    fn list_reports_global_refcount_and_honours_limit() {
        let ipt = small();
        let f = FrameNumber::new(2);
        for s in 1..=4 {
            ipt.insert(f, space(s), VirtualAddress::new(0x2000), PageFlags::user_read_only())
                .unwrap();
        }
        let listed = ipt.list_for_frame(f, 3);
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|m| m.frame_refcount == 4));
        assert!(ipt.list_for_frame(f, 0).is_empty());
    }

    #[test]
    fn unbounded_limit_lists_everything() {
        let ipt = small();
        let f = FrameNumber::new(3);
        for s in 1..=5 {
            ipt.insert(f, space(s), VirtualAddress::new(0x3000), PageFlags::user_data())
                .unwrap();
        }
        let listed = ipt.list_for_frame(f, usize::MAX);
        assert_eq!(listed.len(), 5);
        assert!(listed.capacity() <= 32);
        assert!(ipt.list_for_frame(FrameNumber::new(4), usize::MAX).is_empty());
    }

    #[test]
    fn remove_all_of_touches_only_that_space() {
        let ipt = small();
        for pfn in 0..10 {
            let va = VirtualAddress::new(0x10_0000 + pfn * 0x1000);
            ipt.insert(FrameNumber::new(pfn), space(1), va, PageFlags::user_data())
                .unwrap();
            if pfn % 2 == 0 {
                ipt.insert(FrameNumber::new(pfn), space(2), va, PageFlags::user_read_only())
                    .unwrap();
            }
        }

        assert_eq!(ipt.remove_all_of(space(1)), 10);
        assert_eq!(ipt.mappings_of(space(1)), 0);
        assert_eq!(ipt.mappings_of(space(2)), 5);
        assert_eq!(ipt.refcount_of(FrameNumber::new(4)), 1);
        assert_eq!(ipt.refcount_of(FrameNumber::new(5)), 0);
        assert_eq!(ipt.check_invariants(), Ok(()));
    }

    #[test]
    fn untracked_frames() {
        let ipt = small();
        let far = FrameNumber::new(64);
        assert_eq!(
            ipt.insert(far, space(1), VirtualAddress::new(0), PageFlags::user_data()),
            Err(IptError::FrameOutOfRange {
                frame: far,
                max_frames: 64
            })
        );
        assert_eq!(ipt.refcount_of(far), 0);
        assert_eq!(ipt.refcount_of(FrameNumber::new(u64::MAX)), 0);
        assert!(ipt.is_empty());
    }

    #[test]
    fn exhaustion_leaves_table_unchanged() {
        let ipt = InversePageTable::new(&TableConfig::new(4, 2), 16).unwrap();
        let f = FrameNumber::new(1);
        ipt.insert(f, space(1), VirtualAddress::new(0x1000), PageFlags::user_data())
            .unwrap();
        ipt.insert(f, space(2), VirtualAddress::new(0x1000), PageFlags::user_data())
            .unwrap();

        assert_eq!(
            ipt.insert(f, space(3), VirtualAddress::new(0x1000), PageFlags::user_data()),
            Err(IptError::Exhausted { capacity: 2 })
        );
        assert_eq!(ipt.refcount_of(f), 2);
        assert_eq!(ipt.len(), 2);
        // refreshing an existing key needs no slot
        assert_eq!(
            ipt.insert(f, space(2), VirtualAddress::new(0x1000), PageFlags::user_read_only()),
            Ok(InsertOutcome::Refreshed)
        );
        assert_eq!(ipt.check_invariants(), Ok(()));
    }

    #[test]
    fn stray_duplicates_are_counted_and_clamped() {
        let ipt = small();
        let f = FrameNumber::new(6);
        let key = IptEntry {
            frame: f,
            space: space(1),
            page: VirtualAddress::new(0x3000).page(),
            flags: PageFlags::user_data(),
        };
        // Forge a duplicate behind the table's back.
        {
            let mut g = ipt.inner.lock();
            let bucket = frame_bucket(f, g.chains.bucket_count());
            g.chains.push_front(bucket, key).unwrap();
            g.chains.push_front(bucket, key).unwrap();
            g.refcounts[6] = 1;
        }
        assert!(matches!(
            ipt.check_invariants(),
            Err(InvariantViolation::DuplicateEntry { .. })
        ));

        assert_eq!(ipt.remove(f, space(1), VirtualAddress::new(0x3000)), 2);
        assert_eq!(ipt.refcount_of(f), 0);
        assert_eq!(ipt.check_invariants(), Ok(()));
    }

    #[test]
    fn refcount_mismatch_is_reported() {
        let ipt = small();
        ipt.insert(FrameNumber::new(1), space(1), VirtualAddress::new(0), PageFlags::user_data())
            .unwrap();
        ipt.inner.lock().refcounts[1] = 3;
        assert_eq!(
            ipt.check_invariants(),
            Err(InvariantViolation::RefcountMismatch {
                frame: FrameNumber::new(1),
                refcount: 3,
                live: 1
            })
        );
    }
}
