//! Configuration
//!
//! Sizing for a [`ProcessCache`](crate::compute::ProcessCache), loadable
//! from JSON. Every field is optional.
//!
//! ```json
//! {
//!     "value_cache_max_cost": 1073741824,
//!     "hash_cache_max_cost": 100000,
//!     "serial_hash_cache_max_cost": 100000,
//!     "bins": 16
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;

/// Cache budgets for a process cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessCacheConfig {
    /// Budget of each shared value cache, in the nodes' cost units.
    pub value_cache_max_cost: usize,

    /// Maximum number of hashes in each shared hash cache.
    pub hash_cache_max_cost: usize,

    /// Maximum number of hashes in each thread's serial hash cache.
    pub serial_hash_cache_max_cost: usize,

    /// Bins per shared cache. Defaults to the available parallelism.
    pub bins: Option<usize>,
}

impl Default for ProcessCacheConfig {
    fn default() -> Self {
        Self {
            value_cache_max_cost: 1 << 30,
            hash_cache_max_cost: 100_000,
            serial_hash_cache_max_cost: 100_000,
            bins: None,
        }
    }
}

impl ProcessCacheConfig {
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        let config: Self = serde_json::from_str(json)?;
        if config.bins == Some(0) {
            return Err(CacheError::ZeroBins);
        }
        debug!(?config, "loaded process cache configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = ProcessCacheConfig::from_json(r#"{ "bins": 4 }"#).unwrap();
        assert_eq!(config.bins, Some(4));
        assert_eq!(config.hash_cache_max_cost, ProcessCacheConfig::default().hash_cache_max_cost);
    }

    #[test]
    fn empty_object_is_the_default() {
        let config = ProcessCacheConfig::from_json("{}").unwrap();
        assert_eq!(config, ProcessCacheConfig::default());
    }

    #[test]
    fn rejects_zero_bins() {
        let result = ProcessCacheConfig::from_json(r#"{ "bins": 0 }"#);
        assert!(matches!(result, Err(CacheError::ZeroBins)));
    }

    #[test]
    fn rejects_malformed_json() {
        let result = ProcessCacheConfig::from_json(r#"{ "bins": "many" }"#);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
