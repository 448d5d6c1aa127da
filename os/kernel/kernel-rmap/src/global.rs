//! # Process-wide Tracker
//!
//! The kernel keeps exactly one [`MappingTracker`]. It is built by [`init`]
//! during boot, before the first user mapping exists, and reached through
//! [`tracker`] afterwards.

use crate::config::{ConfigError, RmapConfig};
use crate::tracker::MappingTracker;
use kernel_sync::SyncOnceCell;
use log::debug;

static TRACKER: SyncOnceCell<MappingTracker> = SyncOnceCell::new();

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("mapping tracker already initialized")]
    AlreadyInitialized,
    #[error("invalid mapping tracker configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Builds the global tracker from `config`.
///
/// # Errors
/// - [`InitError::Config`] if `config` does not validate.
/// - [`InitError::AlreadyInitialized`] on every call after the first
///   successful one.
pub fn init(config: &RmapConfig) -> Result<&'static MappingTracker, InitError> {
    if TRACKER.is_initialized() {
        return Err(InitError::AlreadyInitialized);
    }
    let tracker = MappingTracker::new(config)?;
    let tracker = TRACKER
        .set(tracker)
        .map_err(|_| InitError::AlreadyInitialized)?;
    debug!(
        "rmap: tracker ready (ipt {}x{}, stlb {}x{}, {} frames)",
        config.ipt.buckets,
        config.ipt.capacity,
        config.stlb.buckets,
        config.stlb.capacity,
        config.max_frames
    );
    Ok(tracker)
}

/// The global tracker, once [`init`] has succeeded.
#[inline]
#[must_use]
pub fn tracker() -> Option<&'static MappingTracker> {
    TRACKER.get()
}
