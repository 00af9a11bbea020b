//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued to re-run.
//!
//! 3. Before re-running, the effect runs the cleanups registered during its
//!    last run and drops its old dependencies; the new run tracks fresh ones.
//!    A branch that is no longer taken stops triggering the effect.
//!
//! # Errors
//!
//! A panic inside the effect function is caught, logged and swallowed. The
//! edges recorded before the panic stay in place, so the effect still
//! re-runs on the next relevant write. [`Effect::fallible`] does the same
//! for functions that return `Result`.
//!
//! # Cleanup
//!
//! Call [`on_cleanup`](super::on_cleanup) inside the effect to register a
//! callback that runs before the next run and on disposal.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Display};
use std::rc::Rc;

use tracing::error;

use crate::graph::SubscriberId;

use super::runtime::Runtime;
use super::subscriber::Subscription;

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use pulse_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let reader = count.clone();
/// let effect = Effect::new(move || println!("Count is: {}", reader.get()));
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    subscription: Subscription,

    /// Number of times the effect has run.
    run_count: Rc<Cell<usize>>,
}

impl Effect {
    /// Create a new effect in the active runtime.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(mut run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let run_count = Rc::new(Cell::new(0));
        let counter = run_count.clone();
        let work = Rc::new(RefCell::new(move || {
            counter.set(counter.get() + 1);
            run();
        }));

        let runtime = Runtime::current();
        let id = runtime.create_computation(work);
        Self {
            subscription: Subscription::new(&runtime, id),
            run_count,
        }
    }

    /// Create an effect whose function reports failure through `Result`.
    ///
    /// An `Err` is logged and otherwise treated like a completed run.
    pub fn fallible<F, E>(mut run: F) -> Self
    where
        F: FnMut() -> Result<(), E> + 'static,
        E: Display,
    {
        Self::new(move || {
            if let Err(err) = run() {
                error!(error = %err, "effect returned an error");
            }
        })
    }

    /// Get the subscriber ID for this effect.
    pub fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    /// The handle used to dispose this effect.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Dispose of the effect.
    ///
    /// Runs pending cleanups and detaches from every dependency. After
    /// disposal the effect will not run again. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.subscription.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.subscription.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.run_count.get()
    }

    /// Get the number of dependencies recorded by the last run.
    pub fn dependency_count(&self) -> usize {
        let Some(runtime) = self.subscription.runtime() else {
            return 0;
        };
        let count = runtime
            .graph()
            .subscriber(self.id())
            .map_or(0, |node| node.dependencies().len());
        count
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect in the active runtime.
pub fn effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
