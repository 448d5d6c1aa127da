use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// Nobody has claimed the cell.
const EMPTY: u8 = 0;
/// One context claimed the cell and is writing the value.
const WRITING: u8 = 1;
/// The value is written and visible to every `Acquire` load of the state.
const FULL: u8 = 2;

/// A cell written at most once, readable from any context afterwards.
///
/// Used for kernel singletons that have an explicit `init()` step: the
/// initializer calls [`set`](Self::set) and every later reader goes through
/// [`get`](Self::get), which never blocks.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: FULL means the value is written and published.
        self.is_initialized().then(|| unsafe { self.read() })
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == FULL
    }

    /// Stores `value` if the cell is still empty.
    ///
    /// # Errors
    /// Hands `value` back if the cell was already initialized or another
    /// context is initializing it right now.
    pub fn set(&self, value: T) -> Result<&T, T> {
        if self.claim() {
            Ok(self.publish(value))
        } else {
            Err(value)
        }
    }

    /// Returns the value, running `init` first if nobody has yet. Concurrent
    /// callers spin until the winner has published.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }
        if self.claim() {
            return self.publish(init());
        }
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            spin_loop();
        }
    }

    /// Moves the cell from EMPTY to WRITING; true for the single winner.
    #[inline]
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Only the context that won [`claim`](Self::claim) may call this.
    fn publish(&self, value: T) -> &T {
        // SAFETY: WRITING is held by us; no reader looks at the slot yet.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(FULL, Ordering::Release);
        // SAFETY: just written and published.
        unsafe { self.read() }
    }

    /// # Safety
    /// The state must be FULL.
    unsafe fn read(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            // SAFETY: FULL and we have exclusive access.
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

// Safety: readers only ever see `&T` after FULL; exactly one writer.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
