//! # Kernel synchronization primitives
//!
//! Spin-based building blocks for kernel-global state:
//!
//! - [`SpinLock`]: a named test-and-test-and-set lock with an RAII guard.
//!   Every shared table in the kernel sits behind exactly one of these.
//! - [`SyncOnceCell`]: a write-once cell for process-wide singletons that
//!   must be initialized explicitly before first use.
//!
//! Neither primitive sleeps or allocates; a critical section is as long as
//! the caller makes it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
