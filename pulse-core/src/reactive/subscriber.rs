//! Subscriber handles.
//!
//! A subscriber is anything a signal notifies: a tracked computation, a
//! plain listener, or a lazy memo's tracking record. The records live in the
//! runtime's arena; this module holds the handle callers keep to tear one
//! down.

use std::fmt;

use crate::graph::SubscriberId;

use super::runtime::{Runtime, WeakRuntime};

/// Handle to a subscriber registered with a runtime.
///
/// Dropping the handle leaves the subscriber running; call
/// [`dispose`](Self::dispose) to remove it. The handle does not keep the
/// runtime alive, and a subscriber whose runtime is gone counts as disposed.
#[derive(Clone)]
pub struct Subscription {
    runtime: WeakRuntime,
    id: SubscriberId,
}

impl Subscription {
    pub(crate) fn new(runtime: &Runtime, id: SubscriberId) -> Self {
        Self {
            runtime: runtime.downgrade(),
            id,
        }
    }

    /// A handle that was never registered, for sources whose runtime is gone.
    pub(crate) fn detached() -> Self {
        Self {
            runtime: WeakRuntime::detached(),
            id: SubscriberId::new(usize::MAX, 0),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The runtime the subscriber is registered with, if it still exists.
    pub fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    /// Run pending cleanups and detach from every signal.
    ///
    /// Disposing twice is the same as disposing once.
    pub fn dispose(&self) {
        if let Some(runtime) = self.runtime() {
            runtime.dispose_subscriber(self.id);
        }
    }

    /// Check if the subscriber has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.runtime()
            .map_or(true, |runtime| !runtime.is_alive(self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
