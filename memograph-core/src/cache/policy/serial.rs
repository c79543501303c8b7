//! Serial Policy
//!
//! Single-threaded storage with no locking at all. The storage is neither
//! `Send` nor `Sync`, so the compiler keeps it on the thread that built it;
//! a per-thread cache is the intended use.
//!
//! Every handle is writable. A getter that recurses into the cache for its
//! own key finds the entry `Computing` and computes it again in place.

use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::{sealed, AcquireMode, Handle, Policy, Storage, MAX_EVICTION_SWEEPS};
use crate::cache::cost::Cost;
use crate::cache::entry::{CacheEntry, Slot, Status};

/// Single-threaded policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl sealed::Sealed for Serial {}

impl Policy for Serial {
    type Storage<K, V, C> = SerialStorage<K, V, C>
    where
        K: Hash + Eq + Clone,
        V: Clone,
        C: Cost;

    const NAME: &'static str = "serial";
}

struct SerialItem<V, C> {
    slot: RefCell<Slot<V, C>>,
    recently_used: Cell<bool>,
}

/// Storage for the [`Serial`] policy.
pub struct SerialStorage<K, V, C> {
    map: RefCell<IndexMap<K, Rc<SerialItem<V, C>>>>,
    cursor: Cell<usize>,
}

/// A handle into [`SerialStorage`].
pub struct SerialHandle<V, C> {
    item: Rc<SerialItem<V, C>>,
}

impl<K, V, C> Storage<K, V, C> for SerialStorage<K, V, C>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: Cost,
{
    type Handle = SerialHandle<V, C>;

    fn with_bins(_bins: usize) -> Self {
        Self {
            map: RefCell::new(IndexMap::new()),
            cursor: Cell::new(0),
        }
    }

    fn acquire(&self, key: &K, mode: AcquireMode, _spawns_tasks: bool) -> Option<Self::Handle> {
        let mut map = self.map.borrow_mut();
        let item = match map.get(key) {
            Some(item) => Rc::clone(item),
            None if !mode.inserts() => return None,
            None => {
                let item = Rc::new(SerialItem {
                    slot: RefCell::new(Slot::new()),
                    recently_used: Cell::new(false),
                });
                map.insert(key.clone(), Rc::clone(&item));
                item
            }
        };
        Some(SerialHandle { item })
    }

    fn lookup(&self, key: &K, touch: bool) -> Option<V> {
        let map = self.map.borrow();
        let item = map.get(key)?;
        let value = item.slot.borrow().entry.value().cloned()?;
        if touch {
            item.recently_used.set(true);
        }
        Some(value)
    }

    fn contains(&self, key: &K) -> bool {
        self.map
            .borrow()
            .get(key)
            .is_some_and(|item| item.slot.borrow().entry.status() == Status::Cached)
    }

    fn push(&self, handle: &Self::Handle) {
        handle.item.recently_used.set(true);
    }

    fn pop(&self) -> Option<(K, CacheEntry<V, C>)> {
        let mut map = self.map.borrow_mut();
        if map.is_empty() {
            return None;
        }

        let mut index = self.cursor.get();
        let mut sweeps = 0;
        loop {
            if index >= map.len() {
                index = 0;
                sweeps += 1;
                if sweeps > MAX_EVICTION_SWEEPS {
                    self.cursor.set(0);
                    debug!(sweeps, "eviction walk found nothing to evict");
                    return None;
                }
            }

            let item = &map[index];
            // A computing entry is held further up this thread's stack.
            let evictable = item.slot.borrow().entry.is_evictable();
            if item.recently_used.replace(false) || !evictable {
                index += 1;
                continue;
            }

            self.cursor.set(index);
            let (key, item) = map.swap_remove_index(index)?;
            let entry = item.slot.borrow_mut().detach();
            return Some((key, entry));
        }
    }

    fn remove(&self, key: &K, handle: &Self::Handle) -> CacheEntry<V, C> {
        {
            let mut map = self.map.borrow_mut();
            if let Some(index) = map.get_index_of(key) {
                if Rc::ptr_eq(&map[index], &handle.item) {
                    map.swap_remove_index(index);
                }
            }
        }
        handle.item.slot.borrow_mut().detach()
    }

    fn drain(&self) -> Vec<(K, CacheEntry<V, C>)> {
        self.cursor.set(0);
        let map = std::mem::take(&mut *self.map.borrow_mut());
        map.into_iter()
            .map(|(key, item)| {
                let entry = item.slot.borrow_mut().detach();
                (key, entry)
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.map.borrow().len()
    }
}

impl<V, C> Handle<V, C> for SerialHandle<V, C>
where
    V: Clone,
    C: Cost,
{
    fn status(&self) -> Status {
        self.item.slot.borrow().entry.status()
    }

    fn cached_value(&self) -> Option<V> {
        self.item.slot.borrow().entry.value().cloned()
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn is_recursive(&self) -> bool {
        false
    }

    fn update<R>(&self, f: impl FnOnce(&mut Slot<V, C>) -> R) -> R {
        f(&mut self.item.slot.borrow_mut())
    }

    fn execute<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}
