//! Memoizing Cache
//!
//! [`LruCache`] maps keys to values computed on demand by a getter, bounded
//! by a total cost, with a pluggable concurrency [`Policy`].
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use memograph_core::cache::{LruCache, Parallel};
//!
//! let squares: LruCache<u64, u64, usize, Parallel, _> =
//!     LruCache::new(|n: &u64| Ok::<_, Infallible>((n * n, 1)), 100);
//!
//! assert_eq!(squares.get(&12), Ok(144));
//! assert!(squares.cached(&12));
//! ```

mod builder;
mod cost;
mod entry;
mod getter;
mod lru;
pub mod policy;

pub use builder::CacheBuilder;
pub use cost::Cost;
pub use entry::{CacheEntry, Slot, Status};
pub use getter::{Getter, NoGetter};
pub use lru::{LruCache, RemovalCallback};
pub use policy::{Parallel, Policy, Serial, TaskParallel, MAX_EVICTION_SWEEPS};
