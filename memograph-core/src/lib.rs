//! Memograph Core
//!
//! The compute-and-cache core of the Memograph dependency-graph engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ compute      ProcessCache routes hash/compute requests │
//! │              by each node's CachePolicy                │
//! ├──────────────────────────────────────────────────────┤
//! │ cache        LruCache: memoization, cost bound,        │
//! │              second-chance eviction                    │
//! │   policy     Serial │ Parallel │ TaskParallel          │
//! ├──────────────────────────────────────────────────────┤
//! │ sync         RwSpinLock, TaskMutex                     │
//! │ parallel     TaskArena, for_each_index                 │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Modules
//!
//! - [`cache`]: The memoizing cache and its concurrency policies
//! - [`sync`]: Locks, including the cooperative task mutex
//! - [`parallel`]: Isolated task arenas and parallel loops
//! - [`compute`]: Nodes, contexts and request dispatch
//! - [`config`]: Serializable cache sizing

pub mod cache;
pub mod compute;
pub mod config;
pub mod error;
pub mod parallel;
pub mod sync;

pub use cache::{CacheBuilder, LruCache, Parallel, Serial, TaskParallel};
pub use compute::{CachePolicy, ComputeNode, Context, OutputId, ProcessCache};
pub use config::ProcessCacheConfig;
pub use error::{CacheError, DispatchError};
pub use sync::TaskMutex;
