//! Evaluation Contexts
//!
//! A context is the set of named variables (frame, quality settings, ...)
//! an output is evaluated in. The same output evaluated in two different
//! contexts yields two different cache entries.
//!
//! Contexts are immutable and shared behind an `Arc`, so cloning one into a
//! cache key is cheap. Their hash is computed once, on construction.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Name of the frame variable present in every context made by
/// [`Context::new`].
pub const FRAME: &str = "frame";

/// A single context variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

// Floats compare and hash bitwise so contexts can key a cache.
impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ContextValue {}

impl Hash for ContextValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(value) => value.hash(state),
            Self::Int(value) => value.hash(state),
            Self::Float(value) => value.to_bits().hash(state),
            Self::Text(value) => value.hash(state),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

type Entries = SmallVec<[(String, ContextValue); 4]>;

struct ContextData {
    /// Sorted by name.
    entries: Entries,
    hash: u64,
}

/// An immutable set of named variables.
#[derive(Clone)]
pub struct Context {
    data: Arc<ContextData>,
}

impl Context {
    /// A context holding only the frame, set to 1.
    pub fn new() -> Self {
        Self::empty().with(FRAME, 1.0)
    }

    /// A context with no variables at all.
    pub fn empty() -> Self {
        Self::from_entries(Entries::new())
    }

    fn from_entries(entries: Entries) -> Self {
        let mut hasher = DefaultHasher::new();
        entries.hash(&mut hasher);
        Self {
            data: Arc::new(ContextData {
                hash: hasher.finish(),
                entries,
            }),
        }
    }

    /// A copy of this context with `name` set to `value`.
    pub fn with(&self, name: &str, value: impl Into<ContextValue>) -> Self {
        let mut entries = self.data.entries.clone();
        let value = value.into();
        match entries.binary_search_by(|(existing, _)| existing.as_str().cmp(name)) {
            Ok(index) => entries[index].1 = value,
            Err(index) => entries.insert(index, (name.to_owned(), value)),
        }
        Self::from_entries(entries)
    }

    /// A copy of this context with the frame set.
    pub fn with_frame(&self, frame: f64) -> Self {
        self.with(FRAME, frame)
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.data
            .entries
            .binary_search_by(|(existing, _)| existing.as_str().cmp(name))
            .ok()
            .map(|index| &self.data.entries[index].1)
    }

    /// The frame variable, or 0 if unset or not a number.
    pub fn frame(&self) -> f64 {
        match self.get(FRAME) {
            Some(ContextValue::Float(frame)) => *frame,
            Some(ContextValue::Int(frame)) => *frame as f64,
            _ => 0.0,
        }
    }

    /// The precomputed structural hash.
    pub fn hash_value(&self) -> u64 {
        self.data.hash
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// Variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.data.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            || (self.data.hash == other.data.hash && self.data.entries == other.data.entries)
    }
}

impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.data.hash);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_returns_a_new_context() {
        let base = Context::new();
        let shot = base.with("shot", "sh010");

        assert!(base.get("shot").is_none());
        assert_eq!(shot.get("shot"), Some(&ContextValue::Text("sh010".into())));
        assert_eq!(shot.len(), 2);
    }

    #[test]
    fn equal_variables_make_equal_contexts() {
        let a = Context::empty().with("b", 2i64).with("a", true);
        let b = Context::empty().with("a", true).with("b", 2i64);

        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn different_variables_make_different_contexts() {
        let a = Context::new().with_frame(1.0);
        let b = Context::new().with_frame(2.0);
        assert_ne!(a, b);
    }

    #[test]
    fn frame_defaults() {
        assert_eq!(Context::new().frame(), 1.0);
        assert_eq!(Context::empty().frame(), 0.0);
        assert_eq!(Context::empty().with(FRAME, 12i64).frame(), 12.0);
    }

    #[test]
    fn iteration_is_name_ordered() {
        let context = Context::empty().with("z", 1i64).with("m", 2i64).with("a", 3i64);
        let names: Vec<_> = context.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "m", "z"]);
    }

    #[test]
    fn float_values_compare_bitwise() {
        assert_eq!(ContextValue::Float(f64::NAN), ContextValue::Float(f64::NAN));
        assert_ne!(ContextValue::Float(0.0), ContextValue::Float(-0.0));
    }
}
