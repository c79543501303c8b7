//! Task-Parallel Policy
//!
//! Multi-threaded storage where each entry is guarded by a [`TaskMutex`].
//! A getter run through this policy executes inside an isolated arena, and
//! threads that request the same key while it runs join the arena and help
//! with the parallel work the getter spawns. A getter that re-enters the
//! cache for its own key from one of those tasks gets the value computed
//! in place instead of deadlocking.

use std::hash::Hash;

use super::binned::{Binned, EntryGuard, EntryLock};
use super::{sealed, Policy};
use crate::cache::cost::Cost;
use crate::sync::{TaskMutex, TaskMutexGuard};

/// Thread-safe policy with cooperative, helping waiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskParallel;

impl sealed::Sealed for TaskParallel {}

impl Policy for TaskParallel {
    type Storage<K, V, C> = Binned<K, V, C, TaskMutex>
    where
        K: Hash + Eq + Clone,
        V: Clone,
        C: Cost;

    const NAME: &'static str = "task-parallel";
}

impl EntryLock for TaskMutex {
    type Guard = TaskMutexGuard;

    fn try_lock(&self, write: bool) -> Option<TaskMutexGuard> {
        TaskMutex::try_lock(self, write)
    }

    fn lock_or<F>(&self, write: bool, accept_work: F) -> Option<TaskMutexGuard>
    where
        F: FnOnce() -> bool,
    {
        TaskMutex::lock_or(self, write, accept_work)
    }
}

impl EntryGuard for TaskMutexGuard {
    fn is_writer(&self) -> bool {
        TaskMutexGuard::is_writer(self)
    }

    fn is_recursive(&self) -> bool {
        TaskMutexGuard::is_recursive(self)
    }

    fn upgrade_to_writer(&mut self) -> bool {
        TaskMutexGuard::upgrade_to_writer(self)
    }

    fn execute<R>(&self, f: impl FnOnce() -> R) -> R {
        TaskMutexGuard::execute(self, f)
    }
}
