//! Task Arena
//!
//! An isolated pool of work that any thread may join. The thread that calls
//! [`TaskArena::run_isolated`] owns the arena for the duration of the call;
//! work spawned from inside it goes onto the arena's own queue rather than a
//! global one, so a thread helping out can only ever pick up work that
//! belongs to the computation it is waiting on.
//!
//! Idle rayon workers join through [`TaskArena::invite_helpers`]. A helper
//! runs queued jobs until the queue is empty and then goes back to the pool.
//!
//! # Isolation
//!
//! Isolation is what makes cooperative waiting safe. A thread blocked on a
//! [`TaskMutex`](crate::sync::TaskMutex) helps by running the arena's jobs.
//! If it could steal unrelated work instead, that work might try to take the
//! very lock the thread already holds further up its stack.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::scope::ArenaScope;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// An isolated queue of jobs plus the bookkeeping to know when it is drained.
pub struct TaskArena {
    queue: Mutex<VecDeque<Job>>,
    ready: Condvar,
    /// Jobs queued or running, plus one for the isolated root call.
    outstanding: AtomicUsize,
    /// The first panic raised by a job, re-raised by the owner.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl TaskArena {
    /// Create an empty arena.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            outstanding: AtomicUsize::new(0),
            panic: Mutex::new(None),
        })
    }

    /// Run `f` inside the arena on the calling thread.
    ///
    /// Returns once `f` has returned *and* every job spawned into the arena
    /// has completed. While waiting, the calling thread runs queued jobs
    /// itself. A panic from `f` or from any job is re-raised here after the
    /// arena has drained.
    pub fn run_isolated<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> R {
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let result = {
            let _scope = ArenaScope::enter(Arc::clone(self));
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            self.complete();
            self.help_or_wait(|| self.is_finished());
            result
        };

        match result {
            Ok(value) => {
                if let Some(payload) = self.panic.lock().take() {
                    panic::resume_unwind(payload);
                }
                value
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Run queued jobs until `done` returns true, sleeping while the queue
    /// is empty.
    ///
    /// `done` is evaluated with the queue lock held, and every job completion
    /// wakes the waiters, so a condition that becomes true as a job finishes
    /// is never missed.
    pub fn help_or_wait(self: &Arc<Self>, done: impl Fn() -> bool) {
        let mut queue = self.queue.lock();
        loop {
            if done() {
                return;
            }
            match queue.pop_front() {
                Some(job) => MutexGuard::unlocked(&mut queue, || self.run_job(job)),
                None => self.ready.wait(&mut queue),
            }
        }
    }

    /// Whether the root call and every spawned job have completed.
    pub fn is_finished(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    /// Whether the calling thread is currently working inside this arena,
    /// either as its owner or while running one of its jobs.
    pub fn contains_current_thread(self: &Arc<Self>) -> bool {
        ArenaScope::contains(self)
    }

    /// Number of jobs waiting to be picked up.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue `count` helper tasks on the rayon pool. Each one joins the
    /// arena and drains its queue.
    pub(crate) fn invite_helpers(self: &Arc<Self>, count: usize) {
        for _ in 0..count {
            let arena = Arc::clone(self);
            rayon::spawn(move || arena.drain());
        }
    }

    /// Run queued jobs until none are left. Never waits on jobs that other
    /// threads are running.
    pub(crate) fn drain(self: &Arc<Self>) {
        loop {
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => self.run_job(job),
                None => return,
            }
        }
    }

    pub(crate) fn spawn(&self, job: Job) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let mut queue = self.queue.lock();
        queue.push_back(job);
        self.ready.notify_all();
    }

    fn run_job(self: &Arc<Self>, job: Job) {
        {
            let _scope = ArenaScope::enter(Arc::clone(self));
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                self.panic.lock().get_or_insert(payload);
            }
        }
        self.complete();
    }

    fn complete(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "arena completed more work than it started");

        let _queue = self.queue.lock();
        self.ready.notify_all();
    }
}

impl fmt::Debug for TaskArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskArena")
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn run_isolated_returns_value() {
        let arena = TaskArena::new();
        assert_eq!(arena.run_isolated(|| 41 + 1), 42);
        assert!(arena.is_finished());
    }

    #[test]
    fn owner_runs_spawned_jobs() {
        let arena = TaskArena::new();
        let ran = Arc::new(AtomicUsize::new(0));

        arena.run_isolated(|| {
            for _ in 0..10 {
                let ran = Arc::clone(&ran);
                arena.spawn(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }));
            }
        });

        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(arena.queued(), 0);
        assert!(arena.is_finished());
    }

    #[test]
    fn drain_returns_once_the_queue_is_empty() {
        let arena = TaskArena::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            arena.spawn(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        arena.drain();
        arena.drain();

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(arena.is_finished());
    }

    #[test]
    fn jobs_run_inside_the_arena() {
        let arena = TaskArena::new();
        let inside = Arc::new(AtomicBool::new(false));

        arena.run_isolated(|| {
            let inside = Arc::clone(&inside);
            let job_arena = Arc::clone(&arena);
            arena.spawn(Box::new(move || {
                inside.store(job_arena.contains_current_thread(), Ordering::SeqCst);
            }));
        });

        assert!(inside.load(Ordering::SeqCst));
        assert!(!arena.contains_current_thread());
    }

    #[test]
    fn outside_threads_help_drain_the_arena() {
        let arena = TaskArena::new();
        let helper_ran = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicBool::new(false));

        let helper = std::thread::spawn({
            let arena = Arc::clone(&arena);
            let started = Arc::clone(&started);
            move || {
                while !started.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
                let finished = Arc::clone(&arena);
                arena.help_or_wait(move || finished.is_finished());
            }
        });

        arena.run_isolated(|| {
            for _ in 0..8 {
                let helper_ran = Arc::clone(&helper_ran);
                arena.spawn(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    helper_ran.fetch_add(1, Ordering::SeqCst);
                }));
            }
            started.store(true, Ordering::SeqCst);
        });

        helper.join().unwrap();
        assert_eq!(helper_ran.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn job_panics_reach_the_owner() {
        let arena = TaskArena::new();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            arena.run_isolated(|| {
                arena.spawn(Box::new(|| panic!("job failed")));
            })
        }));

        assert!(result.is_err());
        assert!(arena.is_finished());
    }

    #[test]
    fn root_panics_wait_for_jobs() {
        let arena = TaskArena::new();
        let ran = Arc::new(AtomicBool::new(false));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            arena.run_isolated(|| {
                let ran = Arc::clone(&ran);
                arena.spawn(Box::new(move || ran.store(true, Ordering::SeqCst)));
                panic!("root failed");
            })
        }));

        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
        assert!(arena.is_finished());
    }
}
