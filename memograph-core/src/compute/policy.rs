//! Cache Policies
//!
//! What a node declares about how each of its outputs should be cached.

use serde::{Deserialize, Serialize};

/// Caching strategy for one kind of process (hashing or computing) of an
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never cached; the node is called every time.
    Uncached,

    /// Cached per thread without locking. Only valid for hashes, which are
    /// cheap enough that recomputing them on each thread is fine.
    Serial,

    /// Shared between threads. Threads requesting a value that is being
    /// computed wait for it.
    #[default]
    Parallel,

    /// Shared between threads. The computation may spawn parallel work, and
    /// threads waiting on it help with that work.
    TaskParallel,
}

impl CachePolicy {
    pub fn is_cached(self) -> bool {
        self != Self::Uncached
    }

    /// Whether computations under this policy run as task-spawning.
    pub fn spawns_tasks(self) -> bool {
        self == Self::TaskParallel
    }
}
