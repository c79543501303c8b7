//! Binned Storage
//!
//! The storage engine behind the multi-threaded policies. Keys are hashed
//! into a fixed number of bins, each an insertion-ordered map behind its own
//! reader/writer lock, so lookups of different keys rarely contend.
//!
//! # Lock Ordering
//!
//! There are three kinds of lock: bin locks, per-entry locks (the policy's
//! [`EntryLock`]), and the short-lived slot locks guarding entry contents.
//!
//! - A bin lock may be held while *trying* an entry lock, never while
//!   waiting for one. A busy entry makes the caller release the bin lock
//!   before it waits or helps.
//! - Slot locks are innermost and are never held across user code.
//!
//! Together these rule out lock-order cycles between threads.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::debug;

use super::{AcquireMode, Handle, Storage, MAX_EVICTION_SWEEPS};
use crate::cache::cost::Cost;
use crate::cache::entry::{CacheEntry, Slot, Status};

/// A per-entry reader/writer lock.
pub trait EntryLock: Default + Send + Sync + 'static {
    type Guard: EntryGuard;

    fn try_lock(&self, write: bool) -> Option<Self::Guard>;

    /// Single acquisition attempt. On contention, calls `accept_work`, which
    /// releases the caller's bin lock and says whether the caller will help
    /// the holder.
    fn lock_or<F>(&self, write: bool, accept_work: F) -> Option<Self::Guard>
    where
        F: FnOnce() -> bool;
}

/// A held [`EntryLock`]. Releases on drop.
pub trait EntryGuard {
    fn is_writer(&self) -> bool;
    fn is_recursive(&self) -> bool;
    fn upgrade_to_writer(&mut self) -> bool;
    fn execute<R>(&self, f: impl FnOnce() -> R) -> R;
}

struct Item<V, C, L> {
    slot: RwLock<Slot<V, C>>,
    recently_used: AtomicBool,
    lock: L,
}

impl<V, C: Cost, L: EntryLock> Item<V, C, L> {
    fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::new()),
            recently_used: AtomicBool::new(false),
            lock: L::default(),
        }
    }

    fn status(&self) -> Status {
        self.slot.read().entry.status()
    }

    fn detach(&self) -> CacheEntry<V, C> {
        self.slot.write().detach()
    }
}

type Bin<K, V, C, L> = RwLock<IndexMap<K, Arc<Item<V, C, L>>>>;

/// Where the eviction walk resumes.
#[derive(Debug, Default)]
struct Cursor {
    bin: usize,
    index: usize,
}

/// Hash-binned entry storage, generic over the per-entry lock.
pub struct Binned<K, V, C, L> {
    bins: Box<[Bin<K, V, C, L>]>,
    hasher: RandomState,
    cursor: Mutex<Cursor>,
}

impl<K, V, C, L> Binned<K, V, C, L>
where
    K: Hash + Eq,
{
    fn bin(&self, key: &K) -> &Bin<K, V, C, L> {
        let index = self.hasher.hash_one(key) as usize % self.bins.len();
        &self.bins[index]
    }

    /// Number of bins keys are spread over.
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }
}

/// A locked entry in [`Binned`] storage.
pub struct BinnedHandle<V, C, L: EntryLock> {
    guard: L::Guard,
    item: Arc<Item<V, C, L>>,
    spawns_tasks: bool,
}

impl<K, V, C, L> Storage<K, V, C> for Binned<K, V, C, L>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    L: EntryLock,
{
    type Handle = BinnedHandle<V, C, L>;

    fn with_bins(bins: usize) -> Self {
        Self {
            bins: (0..bins.max(1)).map(|_| RwLock::new(IndexMap::new())).collect(),
            hasher: RandomState::new(),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    fn acquire(&self, key: &K, mode: AcquireMode, spawns_tasks: bool) -> Option<Self::Handle> {
        let bin = self.bin(key);
        // Only `get` has a computation to help with.
        let accept_work = spawns_tasks && mode == AcquireMode::Insert;
        let backoff = Backoff::new();

        loop {
            let read = bin.read();
            let found = read.get(key).cloned();
            let (item, inserted, bin_guard) = match found {
                Some(item) => (item, false, read),
                None if !mode.inserts() => return None,
                None => {
                    drop(read);
                    let mut write = bin.write();
                    let (item, inserted) = match write.get(key) {
                        Some(item) => (Arc::clone(item), false),
                        None => {
                            let item = Arc::new(Item::new());
                            write.insert(key.clone(), Arc::clone(&item));
                            (item, true)
                        }
                    };
                    (item, inserted, RwLockWriteGuard::downgrade(write))
                }
            };

            let mut bin_guard = Some(bin_guard);
            let write = inserted || mode.always_writes();
            let acquired = item.lock.lock_or(write, || {
                bin_guard.take();
                accept_work
            });
            drop(bin_guard);

            let Some(mut guard) = acquired else {
                backoff.snooze();
                continue;
            };

            // A reader that finds no value must become the writer that
            // computes it. If other readers are present, start over.
            if mode == AcquireMode::Insert
                && !guard.is_writer()
                && item.status() != Status::Cached
                && !guard.upgrade_to_writer()
            {
                drop(guard);
                backoff.snooze();
                continue;
            }

            return Some(BinnedHandle {
                guard,
                item,
                spawns_tasks,
            });
        }
    }

    fn lookup(&self, key: &K, touch: bool) -> Option<V> {
        let item = self.bin(key).read().get(key).cloned()?;
        let value = item.slot.read().entry.value().cloned()?;
        if touch {
            item.recently_used.store(true, Ordering::Relaxed);
        }
        Some(value)
    }

    fn contains(&self, key: &K) -> bool {
        let item = self.bin(key).read().get(key).cloned();
        item.is_some_and(|item| item.status() == Status::Cached)
    }

    fn push(&self, handle: &Self::Handle) {
        handle.item.recently_used.store(true, Ordering::Relaxed);
    }

    fn pop(&self) -> Option<(K, CacheEntry<V, C>)> {
        // One walker at a time; the others carry on over budget.
        let mut cursor = self.cursor.try_lock()?;
        let mut sweeps = 0;
        let mut empty_bins = 0;
        let mut map = self.bins[cursor.bin].write();

        loop {
            while cursor.index >= map.len() {
                empty_bins = if map.is_empty() { empty_bins + 1 } else { 0 };
                if empty_bins >= self.bins.len() {
                    return None;
                }

                drop(map);
                cursor.bin = (cursor.bin + 1) % self.bins.len();
                cursor.index = 0;
                if cursor.bin == 0 {
                    sweeps += 1;
                    if sweeps > MAX_EVICTION_SWEEPS {
                        debug!(sweeps, "eviction walk found nothing to evict");
                        return None;
                    }
                }
                map = self.bins[cursor.bin].write();
            }

            let item = Arc::clone(&map[cursor.index]);
            if let Some(_guard) = item.lock.try_lock(true) {
                if !item.recently_used.load(Ordering::Relaxed) {
                    if item.slot.read().entry.is_evictable() {
                        if let Some((key, _)) = map.swap_remove_index(cursor.index) {
                            return Some((key, item.detach()));
                        }
                    }
                } else {
                    item.recently_used.store(false, Ordering::Relaxed);
                }
            }
            cursor.index += 1;
        }
    }

    fn remove(&self, key: &K, handle: &Self::Handle) -> CacheEntry<V, C> {
        {
            let mut map = self.bin(key).write();
            if let Some(index) = map.get_index_of(key) {
                if Arc::ptr_eq(&map[index], &handle.item) {
                    map.swap_remove_index(index);
                }
            }
        }
        handle.item.detach()
    }

    fn drain(&self) -> Vec<(K, CacheEntry<V, C>)> {
        let mut drained = Vec::new();
        for bin in self.bins.iter() {
            let map = std::mem::take(&mut *bin.write());
            drained.extend(map.into_iter().map(|(key, item)| (key, item.detach())));
        }
        drained
    }

    fn len(&self) -> usize {
        self.bins.iter().map(|bin| bin.read().len()).sum()
    }
}

impl<V, C, L> Handle<V, C> for BinnedHandle<V, C, L>
where
    V: Clone,
    C: Cost,
    L: EntryLock,
{
    fn status(&self) -> Status {
        self.item.status()
    }

    fn cached_value(&self) -> Option<V> {
        self.item.slot.read().entry.value().cloned()
    }

    fn is_writable(&self) -> bool {
        self.guard.is_writer()
    }

    fn is_recursive(&self) -> bool {
        self.guard.is_recursive()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Slot<V, C>) -> R) -> R {
        debug_assert!(self.is_writable(), "update through a read-only handle");
        f(&mut self.item.slot.write())
    }

    fn execute<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.spawns_tasks {
            self.guard.execute(f)
        } else {
            f()
        }
    }
}

impl<K, V, C, L> fmt::Debug for Binned<K, V, C, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binned")
            .field("bins", &self.bins.len())
            .finish_non_exhaustive()
    }
}
