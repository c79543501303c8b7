//! Synchronization Primitives
//!
//! - [`RwSpinLock`]: a data-less reader/writer lock with non-blocking
//!   upgrade.
//! - [`TaskMutex`]: a reader/writer mutex whose waiters help the holder
//!   finish its work instead of sleeping.

mod spin;
mod task_mutex;

pub use spin::RwSpinLock;
pub use task_mutex::{TaskMutex, TaskMutexGuard};
