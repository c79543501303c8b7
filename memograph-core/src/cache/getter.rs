//! Getters
//!
//! A getter computes the value and cost for a key on a cache miss. Any
//! `Fn(&K) -> Result<(V, C), E>` is a getter.

/// Computes values for cache misses.
pub trait Getter<K, V, C> {
    type Error;

    fn get(&self, key: &K) -> Result<(V, C), Self::Error>;
}

impl<K, V, C, E, F> Getter<K, V, C> for F
where
    F: Fn(&K) -> Result<(V, C), E>,
{
    type Error = E;

    fn get(&self, key: &K) -> Result<(V, C), E> {
        self(key)
    }
}

/// Placeholder for caches filled only through `set` or `get_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGetter;
