//! Compute Dispatch
//!
//! The contract between graph nodes and the caches. A node exposes outputs
//! that can be *hashed* (cheaply identify the value) and *computed* (produce
//! the value), and declares a [`CachePolicy`] for each. A [`ProcessCache`]
//! routes every request to the right cache, keyed by output and
//! [`Context`].

mod context;
mod dispatch;
mod policy;
mod process;

pub use context::{Context, ContextValue, FRAME};
pub use dispatch::ProcessCache;
pub use policy::CachePolicy;
pub use process::{ComputeNode, OutputId, ProcessKey};
