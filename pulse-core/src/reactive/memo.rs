//! Memo Implementation
//!
//! A Memo is a derived value: a signal whose content is computed from other
//! signals and can never be written from outside.
//!
//! # Eager and Lazy
//!
//! - [`Memo::new`] is eager. It is backed by a computation that re-derives
//!   the value as soon as an input changes and pushes the result into the
//!   memo's own signal, so readers are notified through the usual path (and
//!   not at all if the new value compares equal).
//!
//! - [`Memo::lazy`] defers work. An input change only marks the memo stale
//!   (at once, even inside a transaction) and notifies its readers; the
//!   derivation runs on the next read. Several input changes between two
//!   reads cost one derivation.
//!
//! # Errors
//!
//! Writes are rejected with [`ReactiveError::ReadOnly`]. A panic inside an
//! eager memo's later runs is logged and the last value is kept. A panic in
//! a lazy memo's derivation reaches whoever read it; the memo stays stale and
//! retries on the next read.
//!
//! # Disposal
//!
//! After [`Memo::dispose`], [`Runtime::dispose_group`] on its group, or the
//! loss of its runtime, the memo stops reacting. Reads keep returning the
//! last cached value.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use crate::error::{ReactiveError, Result};
use crate::graph::SubscriberId;

use super::context::{ReactiveContext, RuntimeScope};
use super::effect::Effect;
use super::runtime::{untrack, Runtime, WeakRuntime};
use super::signal::{CellHandle, Signal};

/// Which flavour of memo this is, and whether its cache is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// Eager memo; the value is always up to date while it is alive.
    Eager,

    /// Lazy memo with a current cached value.
    Clean,

    /// Lazy memo that must re-derive on the next read.
    Dirty,
}

struct LazyMemo<T: 'static> {
    runtime: WeakRuntime,
    node: SubscriberId,
    cell: CellHandle,
    derive: RefCell<Box<dyn FnMut() -> T>>,
    cached: RefCell<Option<T>>,
    dirty: Cell<bool>,
    /// Set by every read attempt, cleared when readers are notified.
    armed: Cell<bool>,
    disposed: Cell<bool>,
}

impl<T: Clone + 'static> LazyMemo<T> {
    fn new(derive: Box<dyn FnMut() -> T>) -> Rc<Self> {
        let runtime = Runtime::current();
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let node = runtime.create_derivation(Rc::new(move || {
                if let Some(memo) = weak.upgrade() {
                    memo.invalidate();
                }
            }));
            let cell = CellHandle::new();
            runtime.set_cell_owner(cell.id(), node);
            Self {
                cell,
                runtime: runtime.downgrade(),
                node,
                derive: RefCell::new(derive),
                cached: RefCell::new(None),
                dirty: Cell::new(true),
                armed: Cell::new(false),
                disposed: Cell::new(false),
            }
        })
    }

    /// An input changed: go stale and tell readers, without re-deriving.
    ///
    /// Readers hear about it once per read, however many inputs change.
    fn invalidate(&self) {
        self.dirty.set(true);
        if self.armed.replace(false) {
            self.cell.notify();
        }
    }

    fn get(&self) -> T {
        self.cell.track();
        self.read()
    }

    fn read(&self) -> T {
        self.armed.set(true);
        let cached = if self.dirty.get() {
            None
        } else {
            self.cached.borrow().clone()
        };
        match cached {
            Some(value) => value,
            None => self.recompute(),
        }
    }

    fn recompute(&self) -> T {
        let runtime = match self.runtime.upgrade() {
            Some(runtime) if !self.is_disposed() => runtime,
            _ => return self.detached_value(),
        };

        runtime.prepare_rerun(self.node);
        let value = {
            let _scope = RuntimeScope::enter(&runtime);
            let _ctx = ReactiveContext::enter(&runtime, self.node);
            let mut derive = self.derive.borrow_mut();
            (*derive)()
        };
        *self.cached.borrow_mut() = Some(value.clone());
        self.dirty.set(false);
        value
    }

    /// The value of a memo that no longer reacts: the cache, or a single
    /// untracked derivation if it never derived.
    fn detached_value(&self) -> T {
        if let Some(value) = self.cached.borrow().clone() {
            return value;
        }
        let value = untrack(|| {
            let mut derive = self.derive.borrow_mut();
            (*derive)()
        });
        *self.cached.borrow_mut() = Some(value.clone());
        value
    }

    /// Disposed directly, through its group, or with its runtime.
    fn is_disposed(&self) -> bool {
        self.disposed.get()
            || self
                .runtime
                .upgrade()
                .map_or(true, |runtime| !runtime.is_alive(self.node))
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_subscriber(self.node);
        }
    }
}

impl<T: 'static> Drop for LazyMemo<T> {
    fn drop(&mut self) {
        if self.disposed.get() {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let graph_free = runtime.try_graph().is_some();
        if graph_free {
            runtime.dispose_subscriber(self.node);
        }
    }
}

enum MemoKind<T: 'static> {
    Eager { cell: Signal<T>, effect: Effect },
    Lazy(Rc<LazyMemo<T>>),
}

impl<T: 'static> Clone for MemoKind<T> {
    fn clone(&self) -> Self {
        match self {
            MemoKind::Eager { cell, effect } => MemoKind::Eager {
                cell: cell.clone(),
                effect: effect.clone(),
            },
            MemoKind::Lazy(inner) => MemoKind::Lazy(Rc::clone(inner)),
        }
    }
}

/// A derived value that recomputes only when its dependencies change.
///
/// Cloning a memo yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use pulse_core::reactive::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let source = count.clone();
/// let doubled = Memo::new(move || source.get() * 2);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// assert!(doubled.set(0).is_err());
/// ```
pub struct Memo<T: 'static> {
    kind: MemoKind<T>,
}

impl<T: Clone + PartialEq + 'static> Memo<T> {
    /// Create an eager memo. The derivation runs now and after every change
    /// to what it read; readers are notified only when the result differs.
    ///
    /// # Panics
    ///
    /// Panics if the first evaluation of `derive` panics, since there is no
    /// value to cache.
    pub fn new(derive: impl FnMut() -> T + 'static) -> Self {
        Self::with_equality(derive, |a: &T, b: &T| a == b)
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Create an eager memo with a custom equality predicate.
    ///
    /// # Panics
    ///
    /// Panics if the first evaluation of `derive` panics.
    pub fn with_equality(
        mut derive: impl FnMut() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let slot: Rc<RefCell<Option<Signal<T>>>> = Rc::new(RefCell::new(None));
        let mut equals = Some(equals);

        let writer = slot.clone();
        let effect = Effect::new(move || {
            let value = derive();
            let cell = writer.borrow().clone();
            match cell {
                Some(cell) => {
                    cell.write(value);
                }
                None => {
                    if let Some(equals) = equals.take() {
                        *writer.borrow_mut() = Some(Signal::with_equality(value, equals));
                    }
                }
            }
        });

        let cell = slot.borrow().clone();
        match cell {
            Some(cell) => {
                if let Some(runtime) = effect.subscription().runtime() {
                    runtime.set_cell_owner(cell.id(), effect.id());
                }
                Self {
                    kind: MemoKind::Eager { cell, effect },
                }
            }
            None => {
                effect.dispose();
                panic!("memo derivation panicked on its first evaluation");
            }
        }
    }

    /// Create a lazy memo. Nothing runs until the first read.
    pub fn lazy(derive: impl FnMut() -> T + 'static) -> Self {
        Self {
            kind: MemoKind::Lazy(LazyMemo::new(Box::new(derive))),
        }
    }

    /// Get the current value, registering the running computation (if any)
    /// as a reader. A stale lazy memo re-derives first.
    pub fn get(&self) -> T {
        match &self.kind {
            MemoKind::Eager { cell, .. } => cell.get(),
            MemoKind::Lazy(inner) => inner.get(),
        }
    }

    /// Get the current value without registering a dependency.
    ///
    /// A stale lazy memo still re-derives.
    pub fn peek(&self) -> T {
        match &self.kind {
            MemoKind::Eager { cell, .. } => cell.peek(),
            MemoKind::Lazy(inner) => inner.read(),
        }
    }

    /// Always fails: derived values cannot be written.
    pub fn set(&self, _value: T) -> Result<()> {
        Err(ReactiveError::ReadOnly)
    }

    /// Always fails: derived values cannot be written.
    pub fn update(&self, _f: impl FnOnce(&T) -> T) -> Result<()> {
        Err(ReactiveError::ReadOnly)
    }

    /// Stop reacting to inputs. Later reads return the last cached value.
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) {
        match &self.kind {
            MemoKind::Eager { effect, .. } => effect.dispose(),
            MemoKind::Lazy(inner) => inner.dispose(),
        }
    }

    /// Check if the memo has been disposed.
    pub fn is_disposed(&self) -> bool {
        match &self.kind {
            MemoKind::Eager { effect, .. } => effect.is_disposed(),
            MemoKind::Lazy(inner) => inner.is_disposed(),
        }
    }

    /// Whether the memo defers work until read.
    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, MemoKind::Lazy(_))
    }

    /// Get the current state.
    pub fn state(&self) -> MemoState {
        match &self.kind {
            MemoKind::Eager { .. } => MemoState::Eager,
            MemoKind::Lazy(inner) if inner.dirty.get() => MemoState::Dirty,
            MemoKind::Lazy(_) => MemoState::Clean,
        }
    }

    /// Whether the next read will re-derive.
    pub fn is_dirty(&self) -> bool {
        self.state() == MemoState::Dirty
    }

    /// Get the number of readers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        match &self.kind {
            MemoKind::Eager { cell, .. } => cell.subscriber_count(),
            MemoKind::Lazy(inner) => inner.cell.subscriber_count(),
        }
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Memo");
        out.field("state", &self.state());
        match &self.kind {
            MemoKind::Eager { cell, .. } => out.field("value", &cell.peek()),
            MemoKind::Lazy(inner) => out.field("cached", &*inner.cached.borrow()),
        };
        out.field("disposed", &self.is_disposed()).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
