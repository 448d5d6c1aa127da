//! Bucket selection for the shadow tables.
//!
//! Both tables use power-of-two bucket counts, so a bucket index is the low
//! bits of a mixed key.

use crate::addresses::{FrameNumber, VirtualPage};
use crate::asid::AddressSpaceId;

/// Fibonacci hashing multiplier (2^64 / φ).
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

#[inline]
const fn mask(value: u64, buckets: usize) -> usize {
    debug_assert!(buckets.is_power_of_two());
    #[allow(clippy::cast_possible_truncation)]
    let low = value as usize;
    low & (buckets - 1)
}

/// Inverse page table bucket: the low bits of the frame number, so frames
/// that are contiguous in memory spread over consecutive buckets.
#[inline]
#[must_use]
pub const fn frame_bucket(frame: FrameNumber, buckets: usize) -> usize {
    mask(frame.as_u64(), buckets)
}

/// Software TLB bucket: the owner handle scrambled and folded into the
/// virtual page number, so the same page in different address spaces lands
/// in different buckets while one space's pages still spread linearly.
#[inline]
#[must_use]
pub const fn space_page_bucket(space: AddressSpaceId, page: VirtualPage, buckets: usize) -> usize {
    let scrambled = space.as_u64().wrapping_mul(GOLDEN);
    mask((scrambled >> 32) ^ page.number(), buckets)
}
