//! Parallel Execution
//!
//! Data-parallel loops that cooperate with [`TaskArena`]s.
//!
//! # How Work Is Placed
//!
//! [`for_each_index`] looks at where it is called from:
//!
//! - Inside an arena (for example from a getter running under
//!   [`TaskMutex::execute`](crate::sync::TaskMutex)), the loop is split into
//!   chunks that are queued on that arena. Idle rayon workers are invited
//!   in to run chunks alongside the owner, and so are threads waiting on the
//!   mutex.
//!
//! - Anywhere else, the loop runs on the global rayon pool.

mod arena;
mod scope;

pub use arena::TaskArena;

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use scope::ArenaScope;

/// Chunks queued per worker thread, so helpers that arrive late still find
/// work to pick up.
const CHUNKS_PER_THREAD: usize = 4;

/// The innermost arena the calling thread is working in, if any.
pub fn current_arena() -> Option<Arc<TaskArena>> {
    ArenaScope::current()
}

/// Call `f` once for every index in `range`, in parallel.
///
/// Returns when every call has completed. A panic in any call is re-raised
/// on the calling thread once the remaining chunks have finished.
pub fn for_each_index<F>(range: Range<usize>, f: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    if range.is_empty() {
        return;
    }

    match ArenaScope::current() {
        Some(arena) => for_each_in_arena(&arena, range, f),
        None => range.into_par_iter().for_each(f),
    }
}

fn for_each_in_arena<F>(arena: &Arc<TaskArena>, range: Range<usize>, f: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let chunks = (rayon::current_num_threads() * CHUNKS_PER_THREAD).clamp(1, range.len());
    let chunk_size = range.len().div_ceil(chunks);
    let f = Arc::new(f);
    let latch = Arc::new(Latch::new(range.len().div_ceil(chunk_size)));

    for start in range.clone().step_by(chunk_size) {
        let end = (start + chunk_size).min(range.end);
        let f = Arc::clone(&f);
        let latch = Arc::clone(&latch);
        arena.spawn(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (start..end).for_each(|index| f(index))));
            latch.count_down(result.err());
        }));
    }
    arena.invite_helpers(rayon::current_num_threads().min(chunks));

    arena.help_or_wait(|| latch.is_open());

    if let Some(payload) = latch.take_panic() {
        panic::resume_unwind(payload);
    }
}

/// Counts outstanding chunks of one loop.
struct Latch {
    remaining: AtomicUsize,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            panic: Mutex::new(None),
        }
    }

    fn count_down(&self, panic: Option<Box<dyn Any + Send>>) {
        if let Some(payload) = panic {
            self.panic.lock().get_or_insert(payload);
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_open(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn visits_every_index_outside_an_arena() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let sink = Arc::clone(&seen);
        for_each_index(0..1000, move |index| {
            sink.lock().insert(index);
        });

        assert_eq!(seen.lock().len(), 1000);
        assert!(current_arena().is_none());
    }

    #[test]
    fn visits_every_index_inside_an_arena() {
        let arena = TaskArena::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        arena.run_isolated(|| {
            assert!(current_arena().is_some());
            for_each_index(10..20, move |index| sink.lock().push(index));
        });

        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn nested_loops_inside_an_arena() {
        let arena = TaskArena::new();
        let total = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&total);

        arena.run_isolated(|| {
            for_each_index(0..8, move |_| {
                let sink = Arc::clone(&sink);
                for_each_index(0..8, move |_| {
                    sink.fetch_add(1, Ordering::SeqCst);
                });
            });
        });

        assert_eq!(total.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn pool_workers_join_arena_loops() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let sink = Arc::clone(&threads);

        pool.install(|| {
            TaskArena::new().run_isolated(|| {
                for_each_index(0..16, move |_| {
                    sink.lock().insert(std::thread::current().id());
                    std::thread::sleep(std::time::Duration::from_millis(20));
                });
            });
        });

        assert!(threads.lock().len() > 1, "loop ran on a single thread");
    }

    #[test]
    fn empty_range_does_nothing() {
        for_each_index(5..5, |_| panic!("no indices to visit"));
    }

    #[test]
    fn panics_propagate_from_arena_loops() {
        let arena = TaskArena::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            arena.run_isolated(|| {
                for_each_index(0..100, |index| {
                    if index == 42 {
                        panic!("bad index");
                    }
                });
            })
        }));

        assert!(result.is_err());
        assert!(arena.is_finished());
    }
}
