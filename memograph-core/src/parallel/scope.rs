//! Arena Scope
//!
//! Tracks which task arenas the current thread is working inside. A thread
//! enters an arena when it runs an isolated computation, and again whenever
//! it picks up one of the arena's jobs while helping. The stack of entered
//! arenas is what lets a [`TaskMutex`](crate::sync::TaskMutex) recognise a
//! re-entrant acquisition coming from work it spawned itself.

use std::cell::RefCell;
use std::sync::Arc;

use super::arena::TaskArena;

thread_local! {
    static ARENA_STACK: RefCell<Vec<Arc<TaskArena>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that leaves the arena when dropped.
///
/// Leaving happens on unwind too, so a panicking job never leaves a stale
/// entry behind.
pub(crate) struct ArenaScope {
    arena: Arc<TaskArena>,
}

impl ArenaScope {
    /// Enter `arena` on the current thread.
    pub(crate) fn enter(arena: Arc<TaskArena>) -> Self {
        ARENA_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(&arena)));
        Self { arena }
    }

    /// The innermost arena the current thread is working in.
    pub(crate) fn current() -> Option<Arc<TaskArena>> {
        ARENA_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Whether the current thread is working inside `arena` at any depth.
    pub(crate) fn contains(arena: &Arc<TaskArena>) -> bool {
        ARENA_STACK.with(|stack| stack.borrow().iter().any(|entered| Arc::ptr_eq(entered, arena)))
    }

    /// How many arena scopes the current thread has entered.
    #[cfg(test)]
    pub(crate) fn depth() -> usize {
        ARENA_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ArenaScope {
    fn drop(&mut self) {
        ARENA_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entered) = popped {
                debug_assert!(
                    Arc::ptr_eq(&entered, &self.arena),
                    "ArenaScope mismatch: scopes must be left in the order they were entered"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tracks_current_arena() {
        let arena = TaskArena::new();

        assert!(ArenaScope::current().is_none());
        assert!(!ArenaScope::contains(&arena));

        {
            let _scope = ArenaScope::enter(Arc::clone(&arena));
            assert!(ArenaScope::contains(&arena));
            assert!(ArenaScope::current().is_some_and(|current| Arc::ptr_eq(&current, &arena)));
        }

        assert!(ArenaScope::current().is_none());
        assert_eq!(ArenaScope::depth(), 0);
    }

    #[test]
    fn nested_scopes() {
        let outer = TaskArena::new();
        let inner = TaskArena::new();

        {
            let _outer = ArenaScope::enter(Arc::clone(&outer));
            {
                let _inner = ArenaScope::enter(Arc::clone(&inner));
                assert_eq!(ArenaScope::depth(), 2);
                assert!(ArenaScope::contains(&outer));
                assert!(ArenaScope::current().is_some_and(|current| Arc::ptr_eq(&current, &inner)));
            }

            // After the inner scope drops, the outer arena is current again
            assert!(ArenaScope::current().is_some_and(|current| Arc::ptr_eq(&current, &outer)));
            assert!(!ArenaScope::contains(&inner));
        }

        assert_eq!(ArenaScope::depth(), 0);
    }

    #[test]
    fn scopes_are_per_thread() {
        let arena = TaskArena::new();
        let _scope = ArenaScope::enter(Arc::clone(&arena));

        let seen_elsewhere = std::thread::spawn({
            let arena = Arc::clone(&arena);
            move || ArenaScope::contains(&arena)
        })
        .join()
        .unwrap();

        assert!(!seen_elsewhere);
        assert!(ArenaScope::contains(&arena));
    }
}
