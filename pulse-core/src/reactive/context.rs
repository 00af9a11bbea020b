//! Reactive Context
//!
//! Two scoped guards live here:
//!
//! - [`RuntimeScope`] makes a [`Runtime`] the active one for this thread.
//! - [`ReactiveContext`] makes a subscriber the active observer of its
//!   runtime, so signal reads register edges to it.
//!
//! Both restore the previous state when dropped, which covers normal
//! returns and unwinding alike.

use std::cell::RefCell;

use crate::graph::{Observer, SubscriberId};

use super::runtime::Runtime;

thread_local! {
    /// Stack of explicitly activated runtimes. Empty means the default one.
    static RUNTIME_STACK: RefCell<Vec<Runtime>> = const { RefCell::new(Vec::new()) };
}

/// Guard that keeps a runtime active until dropped.
pub struct RuntimeScope {
    depth: usize,
}

impl RuntimeScope {
    /// Activate `runtime` for the lifetime of the guard.
    pub fn enter(runtime: &Runtime) -> Self {
        let depth = RUNTIME_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(runtime.clone());
            stack.len()
        });
        Self { depth }
    }

    /// The innermost explicitly activated runtime, if any.
    pub fn active() -> Option<Runtime> {
        RUNTIME_STACK
            .try_with(|stack| stack.borrow().last().cloned())
            .ok()
            .flatten()
    }
}

impl Drop for RuntimeScope {
    fn drop(&mut self) {
        let _ = RUNTIME_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "RuntimeScope dropped out of order");
            stack.truncate(self.depth - 1);
        });
    }
}

/// Guard that sets a runtime's active observer.
///
/// Entering a subscriber also advances the runtime's generation counter;
/// the new value stamps the run so repeated reads of one signal register
/// a single edge.
pub struct ReactiveContext {
    runtime: Runtime,
    previous: Option<Observer>,
}

impl ReactiveContext {
    /// Make `subscriber` the active observer of `runtime`.
    pub(crate) fn enter(runtime: &Runtime, subscriber: SubscriberId) -> Self {
        let previous = runtime.graph().begin_tracking(subscriber);
        Self {
            runtime: runtime.clone(),
            previous,
        }
    }

    /// Clear the active observer of `runtime` for the guard's lifetime.
    pub(crate) fn suspend(runtime: &Runtime) -> Self {
        let previous = runtime.graph().suspend_tracking();
        Self {
            runtime: runtime.clone(),
            previous,
        }
    }

    /// Check if a computation is being tracked in the active runtime.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// The subscriber being tracked in the active runtime, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        Runtime::current().graph().active()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if let Some(mut graph) = self.runtime.try_graph() {
            graph.restore_tracking(self.previous);
        }
    }
}
