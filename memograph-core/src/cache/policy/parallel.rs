//! Parallel Policy
//!
//! Multi-threaded storage where each entry is guarded by a plain spin lock.
//! A thread that finds an entry busy spins with backoff until the holder is
//! done. Suitable for getters that do not spawn parallel work of their own.

use std::hash::Hash;
use std::sync::Arc;

use super::binned::{Binned, EntryGuard, EntryLock};
use super::{sealed, Policy};
use crate::cache::cost::Cost;
use crate::sync::RwSpinLock;

/// Thread-safe policy with spinning waiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl sealed::Sealed for Parallel {}

impl Policy for Parallel {
    type Storage<K, V, C> = Binned<K, V, C, SpinEntryLock>
    where
        K: Hash + Eq + Clone,
        V: Clone,
        C: Cost;

    const NAME: &'static str = "parallel";
}

/// Shared handle to an entry's spin lock.
#[derive(Debug, Clone, Default)]
pub struct SpinEntryLock(Arc<RwSpinLock>);

impl EntryLock for SpinEntryLock {
    type Guard = SpinEntryGuard;

    fn try_lock(&self, write: bool) -> Option<SpinEntryGuard> {
        self.0.try_lock(write).then(|| SpinEntryGuard {
            lock: Arc::clone(&self.0),
            write,
        })
    }

    fn lock_or<F>(&self, write: bool, accept_work: F) -> Option<SpinEntryGuard>
    where
        F: FnOnce() -> bool,
    {
        let guard = self.try_lock(write);
        if guard.is_none() {
            // There is never work to help with; this only releases the bin.
            accept_work();
        }
        guard
    }
}

/// A held [`SpinEntryLock`].
#[derive(Debug)]
pub struct SpinEntryGuard {
    lock: Arc<RwSpinLock>,
    write: bool,
}

impl EntryGuard for SpinEntryGuard {
    fn is_writer(&self) -> bool {
        self.write
    }

    fn is_recursive(&self) -> bool {
        false
    }

    fn upgrade_to_writer(&mut self) -> bool {
        if !self.write {
            self.write = self.lock.try_upgrade();
        }
        self.write
    }

    fn execute<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

impl Drop for SpinEntryGuard {
    fn drop(&mut self) {
        self.lock.unlock(self.write);
    }
}
