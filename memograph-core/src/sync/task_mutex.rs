//! Task Mutex
//!
//! A reader/writer mutex built for lazy initialisation of expensive values
//! whose computation is itself parallel.
//!
//! # Cooperative Waiting
//!
//! With an ordinary mutex, threads that block on a lock while the holder
//! runs a long parallel computation sit idle, and the holder's parallel
//! loop is starved of the very threads it needs. Worse, if the computation
//! spawns work onto a shared pool, a blocked thread might pick up a piece of
//! that work, which could in turn need the lock: deadlock.
//!
//! `TaskMutex` solves both problems:
//!
//! 1. The holder calls [`TaskMutexGuard::execute`] to run its work inside a
//!    fresh, isolated [`TaskArena`].
//!
//! 2. A thread that fails to get the lock can offer to help. If the holder
//!    is executing, the waiter joins the arena and runs its jobs until the
//!    arena drains, then retries the lock.
//!
//! 3. A job from the arena that asks for the same mutex again (typically by
//!    recursing into a cache for the same key) is recognised as coming from
//!    inside the arena and is granted a *recursive* guard. The recursive
//!    guard shares the owner's lock: it releases nothing when dropped, and
//!    it may write only if the owner holds the write lock.
//!
//! Acquisition never blocks on an operating-system primitive. Threads that
//! cannot help back off with [`crossbeam_utils::Backoff`].

use std::fmt;
use std::sync::Arc;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use super::spin::RwSpinLock;
use crate::parallel::TaskArena;

/// A reader/writer mutex with cooperative, task-aware waiting.
///
/// Cloning produces another handle to the same mutex.
#[derive(Clone, Default)]
pub struct TaskMutex {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    lock: RwSpinLock,
    execution: Mutex<Option<Arc<Execution>>>,
}

/// The work currently running under the lock.
struct Execution {
    arena: Arc<TaskArena>,
    writer: bool,
}

impl TaskMutex {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, helping with the holder's work while waiting.
    pub fn lock(&self, write: bool) -> TaskMutexGuard {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.lock_or(write, || true) {
                return guard;
            }
            backoff.snooze();
        }
    }

    /// Acquire the lock for reading.
    pub fn read(&self) -> TaskMutexGuard {
        self.lock(false)
    }

    /// Acquire the lock for writing.
    pub fn write(&self) -> TaskMutexGuard {
        self.lock(true)
    }

    /// Try to acquire the lock without waiting or helping.
    pub fn try_lock(&self, write: bool) -> Option<TaskMutexGuard> {
        self.inner.lock.try_lock(write).then(|| TaskMutexGuard {
            inner: Arc::clone(&self.inner),
            held: Held::direct(write),
        })
    }

    /// Make a single attempt to acquire the lock.
    ///
    /// If the lock is taken, `accept_work` is called. It may release
    /// resources the caller holds, and returns whether the caller is willing
    /// to help the holder. A willing caller that arrives while the holder is
    /// executing either receives a recursive guard (when it is already
    /// working inside the holder's arena) or runs the holder's jobs until
    /// they are done.
    ///
    /// Returns `None` whenever no guard was granted. The caller should retry,
    /// re-establishing anything `accept_work` released.
    pub fn lock_or<F>(&self, write: bool, accept_work: F) -> Option<TaskMutexGuard>
    where
        F: FnOnce() -> bool,
    {
        if let Some(guard) = self.try_lock(write) {
            return Some(guard);
        }

        if !accept_work() {
            return None;
        }

        let execution = self.inner.execution.lock().clone()?;

        if execution.arena.contains_current_thread() {
            return Some(TaskMutexGuard {
                inner: Arc::clone(&self.inner),
                held: Held::Recursive(execution),
            });
        }

        let arena = &execution.arena;
        arena.help_or_wait(|| arena.is_finished());
        None
    }

    /// Whether the holder is currently executing work other threads can join.
    pub fn is_executing(&self) -> bool {
        self.inner.execution.lock().is_some()
    }
}

impl fmt::Debug for TaskMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMutex")
            .field("locked", &self.inner.lock.is_locked())
            .field("executing", &self.is_executing())
            .finish()
    }
}

enum Held {
    Read,
    Write,
    Recursive(Arc<Execution>),
}

impl Held {
    fn direct(write: bool) -> Self {
        if write {
            Self::Write
        } else {
            Self::Read
        }
    }
}

/// Proof of holding a [`TaskMutex`]. Releases the lock on drop.
pub struct TaskMutexGuard {
    inner: Arc<Inner>,
    held: Held,
}

impl TaskMutexGuard {
    /// Whether the guard may write to the protected data.
    pub fn is_writer(&self) -> bool {
        match &self.held {
            Held::Read => false,
            Held::Write => true,
            Held::Recursive(execution) => execution.writer,
        }
    }

    /// Whether this guard was granted to work running inside the holder's
    /// arena, sharing the holder's lock.
    pub fn is_recursive(&self) -> bool {
        matches!(self.held, Held::Recursive(_))
    }

    /// Promote a read guard to a write guard.
    ///
    /// Returns `false` if another reader holds the lock. A recursive guard
    /// cannot change the owner's mode, so it reports whether the owner holds
    /// the write lock.
    pub fn upgrade_to_writer(&mut self) -> bool {
        match &self.held {
            Held::Write => true,
            Held::Recursive(execution) => execution.writer,
            Held::Read => {
                if self.inner.lock.try_upgrade() {
                    self.held = Held::Write;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Run `f` in a fresh isolated arena that waiting threads may join.
    ///
    /// Work that `f` parallelizes with
    /// [`for_each_index`](crate::parallel::for_each_index) is shared with
    /// any thread that calls [`TaskMutex::lock_or`] and accepts work. On a
    /// recursive guard, `f` simply runs inside the owner's arena.
    pub fn execute<R>(&self, f: impl FnOnce() -> R) -> R {
        if let Held::Recursive(execution) = &self.held {
            debug_assert!(execution.arena.contains_current_thread());
            return f();
        }

        let execution = Arc::new(Execution {
            arena: TaskArena::new(),
            writer: self.is_writer(),
        });
        let arena = Arc::clone(&execution.arena);

        arena.run_isolated(|| {
            let _published = Published::new(&self.inner, execution);
            f()
        })
    }

    /// Release the lock now. A recursive guard leaves the owner's lock held.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TaskMutexGuard {
    fn drop(&mut self) {
        match self.held {
            Held::Read => self.inner.lock.unlock_read(),
            Held::Write => self.inner.lock.unlock_write(),
            Held::Recursive(_) => {}
        }
    }
}

impl fmt::Debug for TaskMutexGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMutexGuard")
            .field("writer", &self.is_writer())
            .field("recursive", &self.is_recursive())
            .finish()
    }
}

/// Makes the running execution visible to waiters; withdraws it on drop,
/// including when the work panics. When another reader is already
/// executing, waiters keep helping that one and nothing is published.
struct Published<'a> {
    inner: &'a Inner,
    published: bool,
}

impl<'a> Published<'a> {
    fn new(inner: &'a Inner, execution: Arc<Execution>) -> Self {
        let mut current = inner.execution.lock();
        let published = current.is_none();
        if published {
            *current = Some(execution);
        }
        Self { inner, published }
    }
}

impl Drop for Published<'_> {
    fn drop(&mut self) {
        if self.published {
            self.inner.execution.lock().take();
        }
    }
}

// ----------------------------------------------------------------------------
