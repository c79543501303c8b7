//! Cache Builder
//!
//! Validated construction of [`LruCache`]s with non-default settings.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;

use super::cost::Cost;
use super::getter::{Getter, NoGetter};
use super::lru::{LruCache, RemovalCallback};
use super::policy::Policy;
use crate::error::CacheError;

/// One bin per available CPU keeps bin contention low without wasting
/// memory on idle maps.
pub(crate) fn default_bins() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Builder for [`LruCache`].
///
/// # Example
///
/// ```
/// use memograph_core::cache::{CacheBuilder, TaskParallel};
///
/// let cache = CacheBuilder::<u64, String>::new(1024)
///     .bins(16)
///     .spawns_tasks(true)
///     .build::<TaskParallel>()
///     .unwrap();
///
/// assert!(cache.set(&1, "one".to_string(), 3));
/// assert_eq!(cache.get_if_cached(&1).as_deref(), Some("one"));
/// ```
pub struct CacheBuilder<K, V, C = usize> {
    max_cost: C,
    bins: Option<usize>,
    spawns_tasks: bool,
    removal_callback: Option<RemovalCallback<K, V>>,
}

impl<K, V, C> CacheBuilder<K, V, C>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
{
    pub fn new(max_cost: C) -> Self {
        Self {
            max_cost,
            bins: None,
            spawns_tasks: true,
            removal_callback: None,
        }
    }

    /// Number of bins keys are hashed into. Ignored by the serial policy.
    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = Some(bins);
        self
    }

    /// Whether `get` lets waiting threads help the getter's parallel work.
    pub fn spawns_tasks(mut self, spawns_tasks: bool) -> Self {
        self.spawns_tasks = spawns_tasks;
        self
    }

    /// Called with every value the cache lets go of.
    pub fn removal_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        self.removal_callback = Some(Box::new(callback));
        self
    }

    /// Build a cache without a getter.
    pub fn build<P: Policy>(self) -> Result<LruCache<K, V, C, P>, CacheError> {
        self.finish(NoGetter)
    }

    /// Build a cache that fills misses with `getter`.
    pub fn build_with_getter<P, G>(self, getter: G) -> Result<LruCache<K, V, C, P, G>, CacheError>
    where
        P: Policy,
        G: Getter<K, V, C>,
    {
        self.finish(getter)
    }

    fn finish<P: Policy, G>(self, getter: G) -> Result<LruCache<K, V, C, P, G>, CacheError> {
        let bins = match self.bins {
            Some(0) => return Err(CacheError::ZeroBins),
            Some(bins) => bins,
            None => default_bins(),
        };

        Ok(LruCache::from_parts(
            getter,
            self.max_cost,
            bins,
            self.spawns_tasks,
            self.removal_callback,
        ))
    }
}

impl<K, V, C: fmt::Debug> fmt::Debug for CacheBuilder<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("max_cost", &self.max_cost)
            .field("bins", &self.bins)
            .field("spawns_tasks", &self.spawns_tasks)
            .field("removal_callback", &self.removal_callback.is_some())
            .finish()
    }
}
