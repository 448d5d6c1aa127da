//! # Translation and Diagnostics
//!
//! Read-only entry points over the hardware page table, the inverse page
//! table and the frame directory. None of them touches the software TLB, so
//! [`translate`] doubles as the oracle the cache is validated against.
//!
//! Lock discipline: each function takes the locks of the structures it reads
//! one after another, never nested. [`reverse_lookup`] in particular copies
//! the frame's mappings out of the IPT and releases its lock before it asks
//! the process table about any owner.

use crate::addresses::{PhysicalAddress, VirtualAddress, VirtualPage};
use crate::asid::AddressSpaceId;
use crate::collab::{FrameDirectory, FrameInfo, HardwarePageTable, Pid, ProcessTable, Translation};
use crate::config::REVERSE_LOOKUP_MAX;
use crate::flags::PageFlags;
use crate::ipt::InversePageTable;
use alloc::vec::Vec;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error("{0} is not a canonical virtual address")]
    Malformed(VirtualAddress),
    #[error("{0} is not mapped")]
    Unmapped(VirtualAddress),
}

/// Resolves `va` in `space` through the page tables.
///
/// # Errors
/// - [`TranslateError::Malformed`] for a non-canonical address.
/// - [`TranslateError::Unmapped`] when no present leaf maps it.
pub fn translate<P>(
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
    tables.walk(space, va).ok_or(TranslateError::Unmapped(va))
}

/// One result of [`reverse_lookup`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReverseMapping {
    /// Process owning the mapping; `None` if its address space has no
    /// process any more (or never had one).
    pub pid: Option<Pid>,
    pub page: VirtualPage,
    pub flags: PageFlags,
    /// Global refcount of the frame, identical across one result set.
    pub frame_refcount: u32,
}

/// Who maps the frame containing `pa`, up to `max` results.
///
/// `max` is clamped to [`REVERSE_LOOKUP_MAX`]. The result is a set; its order
/// carries no meaning.
#[must_use]
pub fn reverse_lookup<T>(
    ipt: &InversePageTable,
    processes: &T,
    pa: PhysicalAddress,
    max: usize,
) -> Vec<ReverseMapping>
where
    T: ProcessTable + ?Sized,
{
    let limit = max.min(REVERSE_LOOKUP_MAX);
    if limit == 0 {
        return Vec::new();
    }
    let frame = pa.page_base().frame();
    ipt.list_for_frame(frame, limit)
        .into_iter()
        .map(|m| ReverseMapping {
            pid: processes.lookup_by_space(m.space),
            page: m.page,
            flags: m.flags,
            frame_refcount: m.frame_refcount,
        })
        .collect()
}

/// The first `min(max, frame_count)` frame records, in index order.
#[must_use]
pub fn dump_frame_directory<D>(directory: &D, max: usize) -> Vec<FrameInfo>
where
    D: FrameDirectory + ?Sized,
{
    directory.snapshot(max.min(directory.frame_count()))
}
