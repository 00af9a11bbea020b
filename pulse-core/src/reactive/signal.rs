//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a computation is running, the signal
//!    registers that computation as a subscriber (once per run).
//!
//! 2. When a write changes the value, every subscriber is queued with the
//!    signal's runtime and run, either at once or when the enclosing
//!    transaction closes.
//!
//! 3. A write that compares equal to the current value does nothing.
//!
//! # Memory Layout
//!
//! The value lives in the signal itself, behind `Rc<RefCell<_>>`. The
//! runtime only stores a small cell record with the subscriber set, which is
//! removed when the last handle to the signal is dropped.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use crate::graph::CellId;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::Subscription;

/// Equality predicate deciding whether a write is a change.
pub type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Same-value comparison for `f64`: NaN equals NaN, `+0.0` and `-0.0`
/// differ.
pub fn same_value_f64(a: &f64, b: &f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

/// Same-value comparison for `f32`.
pub fn same_value_f32(a: &f32, b: &f32) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

/// Treat every write as a change.
pub fn never_equal<T>(_: &T, _: &T) -> bool {
    false
}

/// A cell node registered with a runtime.
///
/// Owns the node: dropping the handle removes the node from the arena.
/// Once the runtime itself is gone, tracking and notification are no-ops.
pub(crate) struct CellHandle {
    runtime: WeakRuntime,
    id: CellId,
}

impl CellHandle {
    pub(crate) fn new() -> Self {
        let runtime = Runtime::current();
        let id = runtime.create_cell();
        Self {
            runtime: runtime.downgrade(),
            id,
        }
    }

    pub(crate) fn id(&self) -> CellId {
        self.id
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.runtime.upgrade()
    }

    pub(crate) fn track(&self) {
        if let Some(runtime) = self.runtime() {
            runtime.track(self.id);
        }
    }

    pub(crate) fn notify(&self) {
        if let Some(runtime) = self.runtime() {
            trace!(runtime = runtime.id(), cell = self.id.index(), "cell changed");
            runtime.notify(self.id);
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.runtime()
            .map_or(0, |runtime| runtime.cell_subscriber_count(self.id))
    }
}

impl Drop for CellHandle {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        let orphans = match runtime.try_graph() {
            Some(mut graph) => graph.remove_cell(self.id),
            None => Vec::new(),
        };
        drop(orphans);
    }
}

struct SignalInner<T> {
    node: CellHandle,
    value: RefCell<T>,
    equals: Equality<T>,
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use pulse_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a signal that compares writes with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, |a: &T, b: &T| a == b)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal with a custom equality predicate.
    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                node: CellHandle::new(),
                value: RefCell::new(value),
                equals: Box::new(equals),
            }),
        }
    }

    /// Id of this signal's cell node.
    pub fn id(&self) -> CellId {
        self.inner.node.id()
    }

    /// The runtime this signal belongs to, or `None` once that runtime has
    /// been dropped.
    pub fn runtime(&self) -> Option<Runtime> {
        self.inner.node.runtime()
    }

    /// Get the current value, registering the running computation (if any)
    /// as a subscriber.
    pub fn get(&self) -> T {
        self.inner.node.track();
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, registering a dependency like [`get`](Self::get).
    ///
    /// Do not write to this signal from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.node.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Alias of [`peek`](Self::peek).
    pub fn get_untracked(&self) -> T {
        self.peek()
    }

    /// Set a new value and notify subscribers if it differs from the
    /// current one.
    pub fn set(&self, value: T) {
        self.write(value);
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.write(next);
    }

    /// The write path shared by `set`, `update` and derived values.
    ///
    /// Returns whether the value changed.
    pub(crate) fn write(&self, value: T) -> bool {
        let unchanged = (self.inner.equals)(&self.inner.value.borrow(), &value);
        if unchanged {
            return false;
        }
        *self.inner.value.borrow_mut() = value;
        self.inner.node.notify();
        true
    }

    /// Call `callback` with the new value whenever the signal changes.
    ///
    /// Like a computation, the listener runs at most once per transaction,
    /// with the final value. It never tracks reads.
    pub fn listen(&self, mut callback: impl FnMut(&T) + 'static) -> Subscription {
        let weak = Rc::downgrade(&self.inner);
        let work = Rc::new(RefCell::new(move || {
            if let Some(inner) = weak.upgrade() {
                let value = inner.value.borrow().clone();
                callback(&value);
            }
        }));
        let Some(runtime) = self.runtime() else {
            return Subscription::detached();
        };
        let id = runtime.create_listener(self.id(), work);
        Subscription::new(&runtime, id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.node.subscriber_count()
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.peek())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
