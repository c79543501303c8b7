//! Error Types
//!
//! Failures that the caches and the dispatch layer report themselves.
//! Errors raised by user computations are never wrapped: they travel back
//! to the caller of `get` unchanged.

use thiserror::Error;

use crate::compute::OutputId;

/// Errors raised while building a cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A binned cache needs at least one bin to hash keys into.
    #[error("a cache needs at least one bin")]
    ZeroBins,

    /// A serialized configuration could not be parsed.
    #[error("invalid cache configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Errors raised by the compute dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Serial caching is only defined for hashes. A node that declares it
    /// for a value computation is misconfigured.
    #[error("output {output} declares a serial cache policy for its value, which only hashes support")]
    SerialValueCompute { output: OutputId },
}
