//! LRU Cache
//!
//! A cost-bounded key/value cache that computes missing values with a
//! getter and guarantees each key is computed at most once at a time.
//!
//! # Getting a Value
//!
//! 1. Acquire the key's entry, creating it if needed. A cached entry is
//!    locked for reading, so hits on one key never serialize.
//!
//! 2. On a hit, mark the entry used and return a clone of the value.
//!
//! 3. On a miss, the caller holds the entry's write lock. It runs the
//!    getter, stores the result, and then evicts until the cache is back
//!    under budget. Other callers for the same key wait (or, under
//!    [`TaskParallel`](super::TaskParallel), help) and then read the stored
//!    value.
//!
//! # Cost Bound
//!
//! After any operation that stores a value completes, the current cost is
//! at most the maximum cost, unless every remaining entry is busy or free.
//! A single value costing more than the maximum is returned to its caller
//! and never stored.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crossbeam_utils::{Backoff, CachePadded};
use tracing::{debug, trace, warn};

use super::cost::Cost;
use super::entry::{CacheEntry, Status};
use super::getter::{Getter, NoGetter};
use super::policy::{AcquireMode, Handle, Parallel, Policy, Storage};

/// Called with each value the cache lets go of: evicted, erased, cleared,
/// or overwritten. Never called with a cache lock held.
pub type RemovalCallback<K, V> = Box<dyn Fn(&K, V) + Send + Sync>;

/// A cost-bounded, memoizing cache.
///
/// - `C` is the cost type, any unsigned integer.
/// - `P` is the concurrency [`Policy`].
/// - `G` is the [`Getter`] used by [`get`](Self::get). Caches built without
///   one use [`get_with`](Self::get_with) instead.
pub struct LruCache<K, V, C = usize, P = Parallel, G = NoGetter>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    P: Policy,
{
    storage: P::Storage<K, V, C>,
    getter: G,
    max_cost: C::Atomic,
    current_cost: CachePadded<C::Atomic>,
    spawns_tasks: bool,
    removal_callback: Option<RemovalCallback<K, V>>,
}

impl<K, V, C, P> LruCache<K, V, C, P, NoGetter>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    P: Policy,
{
    /// Create a getter-less cache with default settings.
    pub fn with_max_cost(max_cost: C) -> Self {
        Self::new(NoGetter, max_cost)
    }
}

impl<K, V, C, P, G> LruCache<K, V, C, P, G>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    P: Policy,
{
    /// Create a cache that fills misses with `getter`.
    ///
    /// Uses one bin per available CPU and lets waiting threads help
    /// task-spawning getters. See [`CacheBuilder`](super::CacheBuilder) to
    /// change either.
    pub fn new(getter: G, max_cost: C) -> Self {
        Self::from_parts(getter, max_cost, super::builder::default_bins(), true, None)
    }

    pub(crate) fn from_parts(
        getter: G,
        max_cost: C,
        bins: usize,
        spawns_tasks: bool,
        removal_callback: Option<RemovalCallback<K, V>>,
    ) -> Self {
        debug!(policy = P::NAME, bins, ?max_cost, "creating cache");
        Self {
            storage: <P::Storage<K, V, C> as Storage<K, V, C>>::with_bins(bins),
            getter,
            max_cost: C::new_atomic(max_cost),
            current_cost: CachePadded::new(C::new_atomic(C::default())),
            spawns_tasks,
            removal_callback,
        }
    }

    /// Get the value for `key`, computing it with `getter` on a miss.
    ///
    /// `getter` runs at most once per call and only if the value is not
    /// cached. Its error is returned unchanged and nothing is cached. When
    /// `spawns_tasks` is set and the policy supports it, threads waiting on
    /// the same key help with parallel work the getter spawns.
    ///
    /// There is no timeout: a getter that never returns blocks every caller
    /// of the same key, and a getter that recurses into its own key without
    /// terminating is not detected.
    pub fn get_with<E, F>(&self, key: &K, spawns_tasks: bool, getter: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<(V, C), E>,
    {
        let backoff = Backoff::new();
        let handle = loop {
            let Some(handle) = self.storage.acquire(key, AcquireMode::Insert, spawns_tasks) else {
                backoff.snooze();
                continue;
            };
            if let Some(value) = handle.cached_value() {
                self.storage.push(&handle);
                return Ok(value);
            }
            if handle.is_writable() {
                break handle;
            }
            // Cleared between acquisition and read.
            drop(handle);
            backoff.snooze();
        };

        // A computing entry we can write to is being computed further up
        // our own call chain.
        let reentrant = handle.is_recursive() || handle.status() == Status::Computing;
        let compute = ComputeGuard::<V, C, _>::begin(&handle);

        match handle.execute(|| getter(key)) {
            Ok((value, cost)) => {
                compute.finish();
                let (cached, replaced) = self.store(&handle, value.clone(), cost);
                self.storage.push(&handle);
                drop(handle);

                if let Some(replaced) = replaced {
                    self.notify_removed(key, replaced);
                }
                if cached {
                    self.limit_cost();
                }
                Ok(value)
            }
            Err(error) => {
                if reentrant {
                    compute.finish();
                    return Err(error);
                }
                drop(compute);
                let entry = self.storage.remove(key, &handle);
                drop(handle);
                trace!("getter failed; entry rolled back");
                self.discard(key, entry);
                Err(error)
            }
        }
    }

    /// Store `value` for `key`, replacing any cached value.
    ///
    /// Returns `false` if the value was not cached because its cost exceeds
    /// the maximum cost.
    pub fn set(&self, key: &K, value: V, cost: C) -> bool {
        let Some(handle) = self.storage.acquire(key, AcquireMode::InsertWritable, false) else {
            return false;
        };
        let (cached, replaced) = self.store(&handle, value, cost);
        self.storage.push(&handle);
        drop(handle);

        if let Some(replaced) = replaced {
            self.notify_removed(key, replaced);
        }
        if cached {
            self.limit_cost();
        }
        cached
    }

    /// The cached value for `key`, without computing it. A hit counts as a
    /// use. Entries still being computed read as misses.
    pub fn get_if_cached(&self, key: &K) -> Option<V> {
        self.storage.lookup(key, true)
    }

    /// Whether `key` holds a cached value.
    pub fn cached(&self, key: &K) -> bool {
        self.storage.contains(key)
    }

    /// Remove `key` from the cache. Returns whether a value was cached.
    ///
    /// Waits for an in-flight computation of `key` to finish first.
    pub fn erase(&self, key: &K) -> bool {
        let Some(handle) = self.storage.acquire(key, AcquireMode::FindWritable, false) else {
            return false;
        };
        let entry = self.storage.remove(key, &handle);
        drop(handle);

        let erased = entry.status() == Status::Cached;
        self.discard(key, entry);
        erased
    }

    /// Remove every entry.
    ///
    /// Computations in flight finish and return their values to their
    /// callers, but those values are not cached.
    pub fn clear(&self) {
        let drained = self.storage.drain();
        debug!(policy = P::NAME, entries = drained.len(), "clearing cache");
        for (key, entry) in drained {
            self.discard(&key, entry);
        }
    }

    /// Change the maximum cost, evicting immediately if now over budget.
    pub fn set_max_cost(&self, max_cost: C) {
        debug!(policy = P::NAME, ?max_cost, "setting max cost");
        C::store(&self.max_cost, max_cost);
        self.limit_cost();
    }

    pub fn max_cost(&self) -> C {
        C::load(&self.max_cost)
    }

    /// Sum of the costs of all cached values.
    pub fn current_cost(&self) -> C {
        C::load(&self.current_cost)
    }

    /// Number of entries, including ones with no value yet.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Whether [`get`](Self::get) lets waiting threads help its getter.
    pub fn spawns_tasks(&self) -> bool {
        self.spawns_tasks
    }

    /// Write `value` into the held entry and charge it to the cache.
    /// Returns whether it was cached, and the value it replaced.
    fn store<H>(&self, handle: &H, value: V, cost: C) -> (bool, Option<V>)
    where
        H: Handle<V, C>,
    {
        let max_cost = self.max_cost();
        let (cached, replaced) = handle.update(|slot| {
            let replaced = slot.entry.take_cached().map(|(value, cost)| {
                C::fetch_sub(&self.current_cost, cost);
                value
            });
            if slot.detached || cost > max_cost {
                return (false, replaced);
            }
            slot.entry.store(value, cost);
            C::fetch_add(&self.current_cost, cost);
            (true, replaced)
        });

        if !cached && cost > max_cost {
            warn!(?cost, ?max_cost, "value exceeds the cache's max cost and was not cached");
        }
        (cached, replaced)
    }

    /// Evict until back under budget.
    fn limit_cost(&self) {
        while self.current_cost() > self.max_cost() {
            let Some((key, entry)) = self.storage.pop() else {
                break;
            };
            trace!(cost = ?entry.cost(), "evicting entry");
            self.discard(&key, entry);
        }
    }

    /// Release the cost of an entry taken out of storage.
    fn discard(&self, key: &K, entry: CacheEntry<V, C>) {
        if let Some((value, cost)) = entry.into_cached() {
            C::fetch_sub(&self.current_cost, cost);
            self.notify_removed(key, value);
        }
    }

    fn notify_removed(&self, key: &K, value: V) {
        if let Some(callback) = &self.removal_callback {
            callback(key, value);
        }
    }
}

impl<K, V, C, P, G> LruCache<K, V, C, P, G>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    P: Policy,
    G: Getter<K, V, C>,
{
    /// Get the value for `key`, computing it with the cache's getter on a
    /// miss. See [`get_with`](Self::get_with).
    pub fn get(&self, key: &K) -> Result<V, G::Error> {
        self.get_with(key, self.spawns_tasks, |key| self.getter.get(key))
    }
}

impl<K, V, C, P, G> fmt::Debug for LruCache<K, V, C, P, G>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
    P: Policy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("policy", &P::NAME)
            .field("len", &self.len())
            .field("current_cost", &self.current_cost())
            .field("max_cost", &self.max_cost())
            .finish_non_exhaustive()
    }
}

/// Marks the held entry `Computing`; rolls it back unless finished.
struct ComputeGuard<'a, V, C, H>
where
    C: Cost,
    H: Handle<V, C>,
{
    handle: &'a H,
    armed: bool,
    _entry: PhantomData<fn() -> (V, C)>,
}

impl<'a, V, C, H> ComputeGuard<'a, V, C, H>
where
    C: Cost,
    H: Handle<V, C>,
{
    fn begin(handle: &'a H) -> Self {
        handle.update(|slot| slot.entry.begin_compute());
        Self {
            handle,
            armed: true,
            _entry: PhantomData,
        }
    }

    fn finish(mut self) {
        self.armed = false;
    }
}

impl<V, C, H> Drop for ComputeGuard<'_, V, C, H>
where
    C: Cost,
    H: Handle<V, C>,
{
    fn drop(&mut self) {
        if self.armed {
            self.handle.update(|slot| slot.entry.abandon_compute());
        }
    }
}

// ----------------------------------------------------------------------------
