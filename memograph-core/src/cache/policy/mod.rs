//! Concurrency Policies
//!
//! A policy decides how an [`LruCache`](super::LruCache) stores its entries
//! and what happens when two callers want the same key.
//!
//! | Policy           | Threads | Concurrent `get` of one key                   |
//! |------------------|---------|-----------------------------------------------|
//! | [`Serial`]       | one     | n/a; recursion computes in place              |
//! | [`Parallel`]     | many    | one computes, the others spin until it is done |
//! | [`TaskParallel`] | many    | one computes, the others help with its tasks  |
//!
//! The multi-threaded policies share one storage engine, [`Binned`], and
//! differ only in the per-entry lock they plug into it.
//!
//! # Eviction
//!
//! All policies evict with a second-chance walk. Every access marks an
//! entry as recently used. The walk clears that mark on the entries it
//! passes and evicts the first entry it finds unmarked, so an entry
//! survives one full pass of the walk after its last use. Entries that are
//! busy, or cached at zero cost, are skipped.

mod binned;
mod parallel;
mod serial;
mod task_parallel;

pub use binned::{Binned, BinnedHandle, EntryGuard, EntryLock};
pub use parallel::{Parallel, SpinEntryGuard, SpinEntryLock};
pub use serial::{Serial, SerialHandle, SerialStorage};
pub use task_parallel::TaskParallel;

use std::hash::Hash;

use super::cost::Cost;
use super::entry::{CacheEntry, Slot, Status};

/// Full passes the eviction walk makes over the cache before giving up.
/// The walk only fails to find a victim when every entry is busy or keeps
/// being used.
pub const MAX_EVICTION_SWEEPS: usize = 50;

/// How a caller wants to access an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Find an existing entry and lock it for writing.
    FindWritable,
    /// Find or create an entry. The lock is shared when the entry already
    /// holds a value and exclusive otherwise, so a getter can fill it.
    Insert,
    /// Find or create an entry and lock it for writing.
    InsertWritable,
}

impl AcquireMode {
    pub fn inserts(self) -> bool {
        !matches!(self, Self::FindWritable)
    }

    pub fn always_writes(self) -> bool {
        !matches!(self, Self::Insert)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A concurrency policy for [`LruCache`](super::LruCache).
pub trait Policy: sealed::Sealed + 'static {
    type Storage<K, V, C>: Storage<K, V, C>
    where
        K: Hash + Eq + Clone,
        V: Clone,
        C: Cost;

    /// Human-readable policy name, used in log output.
    const NAME: &'static str;
}

/// Entry storage behind a cache.
///
/// Storage owns the key index and the eviction walk; cost accounting and
/// the entry lifecycle belong to the cache.
pub trait Storage<K, V, C>: Sized {
    type Handle: Handle<V, C>;

    fn with_bins(bins: usize) -> Self;

    /// Lock the entry for `key`, creating it if `mode` inserts.
    ///
    /// Waits until the lock is available. Returns `None` only when the key
    /// is absent and `mode` does not insert. With `spawns_tasks` set, an
    /// `Insert` that finds the entry busy helps with the holder's work.
    fn acquire(&self, key: &K, mode: AcquireMode, spawns_tasks: bool) -> Option<Self::Handle>;

    /// Clone out the value for `key` if it is cached, without taking the
    /// entry lock. With `touch` set, a hit counts as a use.
    fn lookup(&self, key: &K, touch: bool) -> Option<V>;

    /// Whether `key` currently holds a cached value.
    fn contains(&self, key: &K) -> bool;

    /// Record a use of the held entry.
    fn push(&self, handle: &Self::Handle);

    /// Evict one entry, returning its key and contents. `None` when nothing
    /// can be evicted or another thread is already walking.
    fn pop(&self) -> Option<(K, CacheEntry<V, C>)>;

    /// Remove the held entry from the index and return its contents.
    fn remove(&self, key: &K, handle: &Self::Handle) -> CacheEntry<V, C>;

    /// Remove every entry, including ones currently held by other threads.
    fn drain(&self) -> Vec<(K, CacheEntry<V, C>)>;

    /// Number of indexed entries, whatever their state.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A locked entry.
pub trait Handle<V, C> {
    fn status(&self) -> Status;

    fn cached_value(&self) -> Option<V>;

    /// Whether the handle may modify the entry.
    fn is_writable(&self) -> bool;

    /// Whether the handle shares a lock held further up the call chain.
    fn is_recursive(&self) -> bool;

    /// Modify the entry. Only valid on a writable handle.
    fn update<R>(&self, f: impl FnOnce(&mut Slot<V, C>) -> R) -> R;

    /// Run a getter for this entry, in a way that lets waiting threads help
    /// if the handle was acquired with `spawns_tasks`.
    fn execute<R>(&self, f: impl FnOnce() -> R) -> R;
}
