//! Processes
//!
//! A process is one request to hash or compute an output of a node in a
//! context. This module defines the identities involved and the trait a
//! node implements to take part.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::Context;
use super::policy::CachePolicy;
use crate::error::DispatchError;

/// Process-unique identifier of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

impl OutputId {
    /// Generate a new unique output ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for OutputId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for OutputId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cache key for a process: which output, in which context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub output: OutputId,
    pub context: Context,
}

impl ProcessKey {
    pub fn new(output: OutputId, context: Context) -> Self {
        Self { output, context }
    }
}

/// A node whose outputs can be hashed and computed through a
/// [`ProcessCache`](super::ProcessCache).
///
/// Implementations may call back into the cache from `hash` and `compute`
/// to evaluate their inputs, including the same output in the same
/// context when that makes sense for the node.
pub trait ComputeNode: Sync {
    type Value: Clone;
    type Error: From<DispatchError>;

    /// How hashes of `output` are cached.
    fn hash_cache_policy(&self, _output: OutputId) -> CachePolicy {
        CachePolicy::Parallel
    }

    /// How computed values of `output` are cached. [`CachePolicy::Serial`]
    /// is invalid here.
    fn compute_cache_policy(&self, _output: OutputId) -> CachePolicy {
        CachePolicy::Parallel
    }

    /// A hash that changes whenever the value of `output` in `context`
    /// would.
    fn hash(&self, output: OutputId, context: &Context) -> u64;

    /// Compute the value of `output` in `context`, with its cache cost.
    fn compute(&self, output: OutputId, context: &Context) -> Result<(Self::Value, usize), Self::Error>;
}
