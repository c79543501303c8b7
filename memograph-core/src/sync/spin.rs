//! Reader/Writer Spin Lock
//!
//! A data-less reader/writer lock stored in a single atomic word. It exists
//! for one operation the standard locks cannot express: promoting a shared
//! lock to an exclusive one *without blocking*. The promotion succeeds only
//! while the caller is the sole reader, and fails immediately otherwise so
//! the caller can back off and retry.
//!
//! # Layout
//!
//! The low bit marks a writer. Every reader adds `READER` (two) to the word,
//! so the reader count is `state >> 1`.
//!
//! The lock is not fair and never parks. Callers are expected to hold it for
//! bookkeeping-sized critical sections, or to pair it with a cooperative
//! waiting strategy such as [`TaskMutex`](super::TaskMutex).

use std::sync::atomic::{AtomicUsize, Ordering};

const WRITER: usize = 1;
const READER: usize = 2;

/// A non-blocking reader/writer lock with upgrade support.
#[derive(Debug, Default)]
pub struct RwSpinLock {
    state: AtomicUsize,
}

impl RwSpinLock {
    /// Create an unlocked lock.
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// Try to take a shared lock. Fails while a writer holds the lock.
    pub fn try_read(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state & WRITER != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state + READER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    /// Try to take the exclusive lock. Fails while anyone holds the lock.
    pub fn try_write(&self) -> bool {
        self.state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Try to take the lock in the requested mode.
    pub fn try_lock(&self, write: bool) -> bool {
        if write {
            self.try_write()
        } else {
            self.try_read()
        }
    }

    /// Promote a shared lock held by the caller to the exclusive lock.
    ///
    /// The transition is atomic: no other writer can slip in between. It
    /// fails if any other reader holds the lock, in which case the caller
    /// still holds its shared lock.
    pub fn try_upgrade(&self) -> bool {
        self.state
            .compare_exchange(READER, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release a shared lock.
    pub fn unlock_read(&self) {
        let previous = self.state.fetch_sub(READER, Ordering::Release);
        debug_assert!(
            previous >= READER && previous & WRITER == 0,
            "unlock_read on a lock without readers (state {previous:#x})"
        );
    }

    /// Release the exclusive lock.
    pub fn unlock_write(&self) {
        let previous = self.state.swap(0, Ordering::Release);
        debug_assert_eq!(previous, WRITER, "unlock_write on a lock not held by a writer");
    }

    /// Release the lock held in the given mode.
    pub fn unlock(&self, write: bool) {
        if write {
            self.unlock_write();
        } else {
            self.unlock_read();
        }
    }

    /// Whether anyone holds the lock right now.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }

    /// Whether a writer holds the lock right now.
    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & WRITER != 0
    }

    /// The number of readers currently holding the lock.
    pub fn readers(&self) -> usize {
        self.state.load(Ordering::Relaxed) >> 1
    }
}

// ----------------------------------------------------------------------------
