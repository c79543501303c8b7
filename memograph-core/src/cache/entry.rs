//! Cache Entries
//!
//! An entry moves through three states:
//!
//! ```text
//!             get()                  getter Ok
//!  Uncached ────────► Computing ────────────────► Cached
//!     ▲                   │                          │
//!     └───────────────────┘                          │
//!        getter Err / panic                          │
//!     ▲                                              │
//!     └──────────────────────────────────────────────┘
//!                 evicted / erased / cleared
//! ```
//!
//! `set()` goes straight to `Cached`. A value whose cost exceeds the cache's
//! maximum never reaches `Cached`: it is returned to the caller and the entry
//! stays `Uncached`.

use super::cost::Cost;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No value. The initial state, and the state after a failed compute.
    Uncached,
    /// A getter is running for this entry.
    Computing,
    /// A value is stored and charged to the cache.
    Cached,
}

/// A value, its cost, and its lifecycle state.
#[derive(Debug, Clone)]
pub struct CacheEntry<V, C> {
    value: Option<V>,
    cost: C,
    status: Status,
}

impl<V, C: Cost> CacheEntry<V, C> {
    pub fn status(&self) -> Status {
        self.status
    }

    /// The cost charged for this entry, or zero if nothing is cached.
    pub fn cost(&self) -> C {
        self.cost
    }

    /// The stored value, if cached.
    pub fn value(&self) -> Option<&V> {
        match self.status {
            Status::Cached => self.value.as_ref(),
            _ => None,
        }
    }

    /// Consume the entry, returning the value and cost if it was cached.
    pub fn into_cached(self) -> Option<(V, C)> {
        match self.status {
            Status::Cached => self.value.map(|value| (value, self.cost)),
            _ => None,
        }
    }

    /// Whether the eviction walk may remove this entry. Zero-cost values
    /// free nothing, so they stay.
    pub(crate) fn is_evictable(&self) -> bool {
        match self.status {
            Status::Uncached => true,
            Status::Computing => false,
            Status::Cached => !self.cost.is_zero(),
        }
    }

    pub(crate) fn begin_compute(&mut self) {
        if self.status == Status::Uncached {
            self.status = Status::Computing;
        }
    }

    /// Roll back an unfinished compute.
    pub(crate) fn abandon_compute(&mut self) {
        if self.status == Status::Computing {
            self.status = Status::Uncached;
        }
    }

    pub(crate) fn store(&mut self, value: V, cost: C) {
        self.value = Some(value);
        self.cost = cost;
        self.status = Status::Cached;
    }

    /// Remove the cached value, leaving the entry `Uncached`.
    pub(crate) fn take_cached(&mut self) -> Option<(V, C)> {
        std::mem::take(self).into_cached()
    }
}

impl<V, C: Cost> Default for CacheEntry<V, C> {
    fn default() -> Self {
        Self {
            value: None,
            cost: C::default(),
            status: Status::Uncached,
        }
    }
}

/// An entry plus the flag recording that it has been removed from its
/// cache's index while someone still held it.
///
/// A detached slot still serves its current holder, but nothing written to
/// it is cached or charged.
#[derive(Debug)]
pub struct Slot<V, C> {
    pub(crate) entry: CacheEntry<V, C>,
    pub(crate) detached: bool,
}

impl<V, C: Cost> Slot<V, C> {
    pub(crate) fn new() -> Self {
        Self {
            entry: CacheEntry::default(),
            detached: false,
        }
    }

    /// Mark the slot detached and hand back whatever it held.
    pub(crate) fn detach(&mut self) -> CacheEntry<V, C> {
        self.detached = true;
        std::mem::take(&mut self.entry)
    }

    pub fn entry(&self) -> &CacheEntry<V, C> {
        &self.entry
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lifecycle() {
        let mut entry: CacheEntry<&str, usize> = CacheEntry::default();
        assert_eq!(entry.status(), Status::Uncached);
        assert!(entry.value().is_none());

        entry.begin_compute();
        assert_eq!(entry.status(), Status::Computing);
        assert!(!entry.is_evictable());

        entry.store("value", 3);
        assert_eq!(entry.status(), Status::Cached);
        assert_eq!(entry.value(), Some(&"value"));
        assert_eq!(entry.cost(), 3);

        assert_eq!(entry.take_cached(), Some(("value", 3)));
        assert_eq!(entry.status(), Status::Uncached);
        assert_eq!(entry.cost(), 0);
    }

    #[test]
    fn abandoned_compute_returns_to_uncached() {
        let mut entry: CacheEntry<u32, u32> = CacheEntry::default();
        entry.begin_compute();
        entry.abandon_compute();
        assert_eq!(entry.status(), Status::Uncached);
    }

    #[test]
    fn abandon_leaves_cached_values_alone() {
        let mut entry: CacheEntry<u32, u32> = CacheEntry::default();
        entry.begin_compute();
        entry.store(1, 1);
        entry.abandon_compute();
        assert_eq!(entry.status(), Status::Cached);
    }

    #[test]
    fn zero_cost_values_are_not_evictable() {
        let mut entry: CacheEntry<u32, u32> = CacheEntry::default();
        entry.store(1, 0);
        assert!(!entry.is_evictable());
    }

    #[test]
    fn detaching_empties_the_slot() {
        let mut slot: Slot<u32, usize> = Slot::new();
        slot.entry.store(9, 2);

        let entry = slot.detach();
        assert!(slot.is_detached());
        assert_eq!(slot.entry().status(), Status::Uncached);
        assert_eq!(entry.into_cached(), Some((9, 2)));
    }
}
