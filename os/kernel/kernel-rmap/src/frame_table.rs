//! # Software Frame Directory
//!
//! A fixed-size [`FrameDirectory`] over frames `[0, frames)`: one metadata
//! record per frame plus a stack of free frame numbers. Allocation pops the
//! lowest free frame first on a fresh table; freed frames are reused LIFO.

use crate::addresses::FrameNumber;
use crate::collab::{FrameDirectory, FrameDirectoryError, FrameInfo, Pid};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_sync::SpinLock;

#[derive(Copy, Clone, Debug, Default)]
struct FrameRecord {
    allocated: bool,
    owner: Option<Pid>,
    start_tick: u64,
}

struct FrameTableInner {
    records: Box<[FrameRecord]>,
    free: Vec<FrameNumber>,
}

impl FrameTableInner {
    fn record_mut(
        &mut self,
        frame: FrameNumber,
    ) -> Result<&mut FrameRecord, FrameDirectoryError> {
        let frames = self.records.len();
        frame
            .index()
            .and_then(|i| self.records.get_mut(i))
            .ok_or(FrameDirectoryError::OutOfRange { frame, frames })
    }
}

/// See the [module documentation](self).
pub struct FrameTable {
    inner: SpinLock<FrameTableInner>,
}

impl FrameTable {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        let free = (0..frames)
            .rev()
            .filter_map(|i| FrameNumber::try_from(i).ok())
            .collect();
        Self {
            inner: SpinLock::named(
                "kmem",
                FrameTableInner {
                    records: alloc::vec![FrameRecord::default(); frames].into_boxed_slice(),
                    free,
                },
            ),
        }
    }

    /// Number of frames currently free.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner.with_lock(|inner| inner.free.len())
    }

    #[must_use]
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        let Some(index) = frame.index() else {
            return false;
        };
        self.inner
            .with_lock(|inner| inner.records.get(index).is_some_and(|r| r.allocated))
    }
}

impl FrameDirectory for FrameTable {
    fn alloc(&self, owner: Option<Pid>, tick: u64) -> Option<FrameNumber> {
        let mut inner = self.inner.lock();
        let frame = inner.free.pop()?;
        if let Ok(record) = inner.record_mut(frame) {
            *record = FrameRecord {
                allocated: true,
                owner,
                start_tick: tick,
            };
        }
        Some(frame)
    }

    fn free(&self, frame: FrameNumber) -> Result<(), FrameDirectoryError> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(frame)?;
        if !record.allocated {
            return Err(FrameDirectoryError::NotAllocated(frame));
        }
        *record = FrameRecord::default();
        inner.free.push(frame);
        Ok(())
    }

    fn owner_of(&self, frame: FrameNumber) -> Result<Option<Pid>, FrameDirectoryError> {
        let mut inner = self.inner.lock();
        let record = inner.record_mut(frame)?;
        if record.allocated {
            Ok(record.owner)
        } else {
            Err(FrameDirectoryError::NotAllocated(frame))
        }
    }

    fn frame_count(&self) -> usize {
        self.inner.with_lock(|inner| inner.records.len())
    }

    fn snapshot(&self, max: usize) -> Vec<FrameInfo> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .take(max)
            .enumerate()
            .map(|(frame_index, r)| FrameInfo {
                frame_index,
                allocated: r.allocated,
                owner: r.owner,
                start_tick: r.start_tick,
            })
            .collect()
    }
}
