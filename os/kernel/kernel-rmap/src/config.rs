//! # Table Layout
//!
//! Compile-time defaults for the inverse page table and the software TLB,
//! plus the runtime [`RmapConfig`] built from them. All table memory is
//! reserved up front from these numbers; nothing grows afterwards.

/// Hash buckets in the inverse page table. Power of two.
pub const IPT_BUCKETS: usize = 4096;

/// Hash buckets in the software TLB. Power of two.
pub const STLB_BUCKETS: usize = 1024;

/// Number of physical frames whose refcounts are tracked (`[0, MAX_FRAMES)`).
pub const MAX_FRAMES: usize = 60_000;

/// Entry slots reserved for the inverse page table.
pub const IPT_CAPACITY: usize = 64 * 1024;

/// Entry slots reserved for the software TLB.
pub const STLB_CAPACITY: usize = 16 * 1024;

/// Hard cap on the number of results a reverse lookup returns.
pub const REVERSE_LOOKUP_MAX: usize = 64;

const _: () = {
    assert!(IPT_BUCKETS.is_power_of_two());
    assert!(STLB_BUCKETS.is_power_of_two());
    assert!(IPT_CAPACITY > 0 && STLB_CAPACITY > 0);
    assert!(IPT_CAPACITY <= u32::MAX as usize);
    assert!(STLB_CAPACITY <= u32::MAX as usize);
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("bucket count {0} is not a power of two")]
    BucketsNotPowerOfTwo(usize),
    #[error("table capacity must be between 1 and {max}, got {got}", max = u32::MAX)]
    InvalidCapacity { got: usize },
    #[error("at least one frame must be tracked")]
    NoFrames,
}

/// Shape of one hash table: bucket count and reserved entry slots.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableConfig {
    pub buckets: usize,
    pub capacity: usize,
}

impl TableConfig {
    pub const IPT: Self = Self::new(IPT_BUCKETS, IPT_CAPACITY);
    pub const STLB: Self = Self::new(STLB_BUCKETS, STLB_CAPACITY);

    #[must_use]
    pub const fn new(buckets: usize, capacity: usize) -> Self {
        Self { buckets, capacity }
    }

    /// # Errors
    /// Rejects bucket counts that are not a power of two and capacities that
    /// are zero or exceed the 32-bit slot index space.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !self.buckets.is_power_of_two() {
            return Err(ConfigError::BucketsNotPowerOfTwo(self.buckets));
        }
        if self.capacity == 0 || self.capacity > u32::MAX as usize {
            return Err(ConfigError::InvalidCapacity { got: self.capacity });
        }
        Ok(())
    }
}

/// Configuration for a [`MappingTracker`](crate::MappingTracker).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RmapConfig {
    pub ipt: TableConfig,
    pub stlb: TableConfig,
    pub max_frames: usize,
}

impl Default for RmapConfig {
    fn default() -> Self {
        Self {
            ipt: TableConfig::IPT,
            stlb: TableConfig::STLB,
            max_frames: MAX_FRAMES,
        }
    }
}

impl RmapConfig {
    #[must_use]
    pub const fn with_ipt(mut self, ipt: TableConfig) -> Self {
        self.ipt = ipt;
        self
    }

    #[must_use]
    pub const fn with_stlb(mut self, stlb: TableConfig) -> Self {
        self.stlb = stlb;
        self
    }

    #[must_use]
    pub const fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// # Errors
    /// See [`TableConfig::validate`]; additionally rejects `max_frames == 0`.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = self.ipt.validate() {
            return Err(e);
        }
        if let Err(e) = self.stlb.validate() {
            return Err(e);
        }
        if self.max_frames == 0 {
            return Err(ConfigError::NoFrames);
        }
        Ok(())
    }
}
