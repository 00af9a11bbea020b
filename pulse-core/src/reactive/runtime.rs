//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns one dependency graph and schedules updates when the
//! signals in that graph change.
//!
//! # How It Works
//!
//! 1. Signals and effects register with the runtime that is active when they
//!    are created, and stay bound to it.
//!
//! 2. When an effect runs, the runtime makes it the active observer, so
//!    every signal it reads records an edge back to it.
//!
//! 3. When a signal's value changes, the runtime queues its subscribers. If
//!    no transaction is open and no flush is running, it drains the queue at
//!    once; otherwise the queue is drained when the outermost transaction
//!    closes or the running flush reaches its next round.
//!
//! # Isolation
//!
//! Any number of runtimes can exist side by side. Each has its own arenas,
//! transaction depth and pending queue, so graphs built in different
//! runtimes never trigger each other. One runtime per thread is the
//! default; [`Runtime::run`] makes another one active for a scope.
//!
//! # Ownership
//!
//! Only [`Runtime`] handles keep a runtime alive. Signals, effects and memos
//! hold a [`WeakRuntime`], since their work functions live inside the
//! runtime's own arenas. Once the last `Runtime` handle is dropped, the
//! graph and everything captured by its work functions is dropped with it,
//! and surviving signal handles keep working as plain values.
//!
//! # Threading
//!
//! A runtime is `!Send`. Everything here is synchronous and single-threaded.

use std::any::Any;
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, warn};

use crate::error::{ReactiveError, Result};
use crate::graph::{CellId, Cleanup, Invalidate, NodeKind, SubscriberId, UpdateScheduler, Work};

use super::context::{ReactiveContext, RuntimeScope};
use super::transaction::Transaction;

/// Default cap on flush rounds before pending work is discarded.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 100;

/// Counter for generating unique runtime IDs.
static RUNTIME_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_runtime_id() -> u64 {
    RUNTIME_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::build(RuntimeConfig::default(), true);
}

/// Tunables for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Flush rounds allowed before the scheduler gives up on a flush and
    /// discards whatever is still pending.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
        }
    }
}

/// A snapshot of a runtime's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    /// Live cell nodes.
    pub cells: usize,
    /// Live subscriber nodes (computations, listeners, derivations).
    pub subscribers: usize,
    /// Subscribers waiting for the next flush round.
    pub pending: usize,
    /// Open transaction levels.
    pub depth: usize,
}

struct RuntimeInner {
    id: u64,
    is_default: bool,
    config: RuntimeConfig,
    graph: RefCell<UpdateScheduler>,
}

/// An isolated reactive graph.
///
/// Cloning a `Runtime` yields another handle to the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// A non-owning handle to a runtime.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// A handle that never upgrades.
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(runtime) => f.debug_tuple("WeakRuntime").field(&runtime.id()).finish(),
            None => f.write_str("WeakRuntime(dropped)"),
        }
    }
}

impl Runtime {
    /// Create a new, independent runtime with default settings.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new, independent runtime.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: RuntimeConfig, is_default: bool) -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                id: next_runtime_id(),
                is_default,
                config,
                graph: RefCell::new(UpdateScheduler::new()),
            }),
        }
    }

    /// This thread's default runtime.
    pub fn default_runtime() -> Self {
        DEFAULT_RUNTIME.with(Runtime::clone)
    }

    /// The runtime currently active on this thread.
    pub fn current() -> Self {
        RuntimeScope::active().unwrap_or_else(Self::default_runtime)
    }

    /// Unique id of this runtime.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether this is the thread's default runtime.
    pub fn is_default(&self) -> bool {
        self.inner.is_default
    }

    /// The settings this runtime was built with.
    pub fn config(&self) -> RuntimeConfig {
        self.inner.config
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether this runtime is the active one.
    pub fn is_current(&self) -> bool {
        Runtime::current().ptr_eq(self)
    }

    /// Borrow the graph. Never held across user code.
    pub(crate) fn graph(&self) -> RefMut<'_, UpdateScheduler> {
        self.inner.graph.borrow_mut()
    }

    pub(crate) fn try_graph(&self) -> Option<RefMut<'_, UpdateScheduler>> {
        self.inner.graph.try_borrow_mut().ok()
    }

    /// Run `f` with this runtime active, restoring the previous one after,
    /// including when `f` panics.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = RuntimeScope::enter(self);
        f()
    }

    /// Run `f` inside a transaction on this runtime.
    ///
    /// Writes inside `f` are queued; the queue is flushed once, when the
    /// outermost transaction returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _transaction = Transaction::begin(self);
        f()
    }

    /// Run `f` without tracking any reads.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::suspend(self);
        f()
    }

    /// Register a cleanup on the computation currently running in this
    /// runtime. It runs before that computation's next run, or on disposal.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + 'static) -> Result<()> {
        self.graph()
            .push_cleanup(Box::new(cleanup))
            .map_err(|_| ReactiveError::NoActiveComputation)
    }

    /// Return depth, pending queue and active observer to their defaults.
    ///
    /// Registered signals and effects are left alone.
    pub fn reset(&self) {
        self.graph().reset();
        debug!(runtime = self.id(), "runtime reset");
    }

    /// Bookkeeping counters.
    pub fn stats(&self) -> RuntimeStats {
        let graph = self.graph();
        RuntimeStats {
            cells: graph.cell_count(),
            subscribers: graph.subscriber_count(),
            pending: graph.pending_len(),
            depth: graph.depth(),
        }
    }

    /// Tag every computation created inside `f` with `group`.
    pub fn in_group<R>(&self, group: &str, f: impl FnOnce() -> R) -> R {
        let _guard = GroupGuard::enter(self, Rc::from(group));
        f()
    }

    /// Dispose every computation tagged with `group`.
    ///
    /// Returns how many were disposed.
    pub fn dispose_group(&self, group: &str) -> usize {
        let members = self.graph().take_group(group);
        let disposed = members
            .into_iter()
            .filter(|id| self.dispose_subscriber(*id))
            .count();
        debug!(runtime = self.id(), group, disposed, "group disposed");
        disposed
    }

    /// Number of live computations tagged with `group`.
    pub fn group_len(&self, group: &str) -> usize {
        self.graph().group_len(group)
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    pub(crate) fn create_cell(&self) -> CellId {
        self.graph().insert_cell()
    }

    /// Mark `owner` as the subscriber that writes `cell`, so readers of the
    /// cell are ordered after it during a flush.
    pub(crate) fn set_cell_owner(&self, cell: CellId, owner: SubscriberId) {
        self.graph().set_owner(cell, owner);
    }

    /// Register a read of `cell` by the active observer.
    ///
    /// Reads only track while this runtime is the active one.
    pub(crate) fn track(&self, cell: CellId) {
        if self.is_current() {
            self.graph().track(cell);
        }
    }

    /// Queue every subscriber of `cell` and flush if nothing defers it.
    ///
    /// Lazy derivations are marked stale on the spot, so staleness reaches
    /// every downstream reader before any of them runs.
    pub(crate) fn notify(&self, cell: CellId) {
        let _transaction = Transaction::begin(self);
        let invalidations: Vec<Invalidate> = {
            let mut graph = self.graph();
            let mut invalidations = Vec::new();
            for id in graph.subscribers_of(cell) {
                match graph.kind_of(id) {
                    Some(NodeKind::Derivation(invalidate)) => invalidations.push(invalidate),
                    Some(_) => {
                        graph.enqueue(id);
                    }
                    None => {}
                }
            }
            invalidations
        };
        for invalidate in invalidations {
            invalidate();
        }
    }

    pub(crate) fn cell_subscriber_count(&self, cell: CellId) -> usize {
        self.graph()
            .cell(cell)
            .map_or(0, |node| node.subscriber_count())
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Create a computation and give it its first run.
    pub(crate) fn create_computation(&self, work: Work) -> SubscriberId {
        let id = self.graph().insert_subscriber(NodeKind::Computation(work));
        self.batch(|| self.execute(id));
        id
    }

    /// Attach a plain listener to a cell.
    pub(crate) fn create_listener(&self, cell: CellId, work: Work) -> SubscriberId {
        let mut graph = self.graph();
        let id = graph.insert_subscriber(NodeKind::Listener(work));
        graph.subscribe(cell, id);
        id
    }

    pub(crate) fn create_derivation(&self, invalidate: Invalidate) -> SubscriberId {
        self.graph().insert_subscriber(NodeKind::Derivation(invalidate))
    }

    pub(crate) fn is_alive(&self, id: SubscriberId) -> bool {
        self.graph().contains(id)
    }

    /// Dispose a subscriber: run its cleanups and remove its edges.
    ///
    /// Returns `false` if it was already disposed.
    pub(crate) fn dispose_subscriber(&self, id: SubscriberId) -> bool {
        let removed = self.graph().remove_subscriber(id);
        match removed {
            Some(mut node) => {
                let cleanups = node.take_cleanups();
                self.run_cleanups(cleanups);
                drop(node);
                true
            }
            None => false,
        }
    }

    /// Run the cleanups of `id`'s last run and drop its dependency edges.
    pub(crate) fn prepare_rerun(&self, id: SubscriberId) {
        let cleanups = self.graph().take_cleanups(id);
        self.run_cleanups(cleanups);
        self.graph().unlink(id);
    }

    fn run_cleanups(&self, cleanups: Vec<Cleanup>) {
        for cleanup in cleanups {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                error!(
                    runtime = self.id(),
                    message = panic_message(payload.as_ref()),
                    "cleanup panicked"
                );
            }
        }
    }

    /// Run one subscriber according to its kind.
    fn execute(&self, id: SubscriberId) {
        let Some(kind) = self.graph().kind_of(id) else {
            return;
        };
        match kind {
            NodeKind::Computation(work) => self.run_computation(id, &work),
            NodeKind::Listener(work) => {
                let Ok(mut work) = work.try_borrow_mut() else {
                    self.skip_reentrant(id, "listener");
                    return;
                };
                let _scope = RuntimeScope::enter(self);
                let _ctx = ReactiveContext::suspend(self);
                self.call_work(id, "listener", &mut *work);
            }
            NodeKind::Derivation(invalidate) => invalidate(),
        }
    }

    /// Run a computation: cleanups, fresh edges, then its work function.
    ///
    /// A computation already running further up the stack is left alone,
    /// cleanups and edges included.
    fn run_computation(&self, id: SubscriberId, work: &Work) {
        let Ok(mut work) = work.try_borrow_mut() else {
            self.skip_reentrant(id, "computation");
            return;
        };
        let _scope = RuntimeScope::enter(self);
        self.prepare_rerun(id);
        if !self.is_alive(id) {
            return;
        }
        let _ctx = ReactiveContext::enter(self, id);
        self.call_work(id, "computation", &mut *work);
    }

    fn skip_reentrant(&self, id: SubscriberId, kind: &'static str) {
        warn!(runtime = self.id(), subscriber = id.index(), kind, "skipped re-entrant run");
    }

    fn call_work(&self, id: SubscriberId, kind: &'static str, work: &mut dyn FnMut()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*work)())) {
            error!(
                runtime = self.id(),
                subscriber = id.index(),
                kind,
                message = panic_message(payload.as_ref()),
                "work function panicked"
            );
        }
    }

    /// Drain the pending queue to a fixed point, or until the round cap.
    pub(crate) fn flush(&self) {
        if !self.graph().begin_flush() {
            return;
        }
        let _guard = FlushGuard { runtime: self };
        let max_rounds = self.inner.config.max_flush_rounds;
        let mut rounds = 0;

        loop {
            if rounds >= max_rounds {
                let dropped = self.graph().discard_pending();
                if dropped > 0 {
                    warn!(
                        runtime = self.id(),
                        rounds,
                        dropped,
                        "flush hit the round cap; discarding pending work"
                    );
                }
                break;
            }
            if !self.graph().start_round() {
                break;
            }
            rounds += 1;

            loop {
                let next = self.graph().next_in_round();
                match next {
                    Some(id) => self.execute(id),
                    None => break,
                }
            }
        }
        debug!(runtime = self.id(), rounds, "flush complete");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Runtime");
        out.field("id", &self.id()).field("is_default", &self.is_default());
        if let Ok(graph) = self.inner.graph.try_borrow() {
            out.field("cells", &graph.cell_count())
                .field("subscribers", &graph.subscriber_count())
                .field("depth", &graph.depth());
        }
        out.finish()
    }
}

struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut graph) = self.runtime.try_graph() {
            graph.end_flush();
        }
    }
}

struct GroupGuard {
    runtime: Runtime,
    previous: Option<Rc<str>>,
}

impl GroupGuard {
    fn enter(runtime: &Runtime, group: Rc<str>) -> Self {
        let previous = runtime.graph().set_group(Some(group));
        Self {
            runtime: runtime.clone(),
            previous,
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(mut graph) = self.runtime.try_graph() {
            graph.set_group(self.previous.take());
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Run `f` with `runtime` active.
pub fn with_runtime<R>(runtime: &Runtime, f: impl FnOnce() -> R) -> R {
    runtime.run(f)
}

/// Run `f` without tracking reads in the active runtime.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

/// Register a cleanup on the computation currently running.
pub fn on_cleanup(cleanup: impl FnOnce() + 'static) -> Result<()> {
    Runtime::current().on_cleanup(cleanup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counter_work(count: &Rc<Cell<usize>>) -> Work {
        let count = count.clone();
        Rc::new(RefCell::new(move || count.set(count.get() + 1)))
    }

    #[test]
    fn default_runtime_is_current_outside_any_scope() {
        let runtime = Runtime::current();
        assert!(runtime.is_default());
        assert!(runtime.ptr_eq(&Runtime::default_runtime()));
    }

    #[test]
    fn run_activates_and_restores() {
        let outer = Runtime::new();
        let inner = Runtime::new();

        outer.run(|| {
            assert!(outer.is_current());
            inner.run(|| assert!(inner.is_current()));
            assert!(outer.is_current());
        });
        assert!(Runtime::current().is_default());
    }

    #[test]
    fn run_restores_after_panic() {
        let runtime = Runtime::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.run(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(Runtime::current().is_default());
    }

    #[test]
    fn computation_runs_on_creation() {
        let runtime = Runtime::new();
        let count = Rc::new(Cell::new(0));

        let id = runtime.create_computation(counter_work(&count));

        assert_eq!(count.get(), 1);
        assert!(runtime.is_alive(id));
    }

    #[test]
    fn notify_runs_tracked_computation() {
        let runtime = Runtime::new();
        let cell = runtime.create_cell();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();

        runtime.run(|| {
            runtime.create_computation(Rc::new(RefCell::new(move || {
                Runtime::current().track(cell);
                count_clone.set(count_clone.get() + 1);
            })));
        });

        runtime.notify(cell);
        assert_eq!(count.get(), 2);
        assert_eq!(runtime.cell_subscriber_count(cell), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let runtime = Runtime::new();
        let count = Rc::new(Cell::new(0));
        let id = runtime.create_computation(counter_work(&count));

        assert!(runtime.dispose_subscriber(id));
        assert!(!runtime.dispose_subscriber(id));
        assert_eq!(runtime.stats().subscribers, 0);
    }

    #[test]
    fn weak_handles_do_not_keep_the_runtime_alive() {
        let runtime = Runtime::new();
        let weak = runtime.downgrade();
        assert!(weak.upgrade().is_some_and(|upgraded| upgraded.ptr_eq(&runtime)));

        drop(runtime);
        assert!(weak.upgrade().is_none());
        assert!(WeakRuntime::detached().upgrade().is_none());
    }

    #[test]
    fn reentrant_computation_keeps_its_cleanups() {
        let runtime = Runtime::new();
        let cleanups = Rc::new(Cell::new(0));
        let id = Rc::new(Cell::new(None));

        let (cleanups_clone, id_clone) = (cleanups.clone(), id.clone());
        let created = runtime.run(|| {
            runtime.create_computation(Rc::new(RefCell::new(move || {
                let cleanups = cleanups_clone.clone();
                on_cleanup(move || cleanups.set(cleanups.get() + 1)).unwrap();
                if let Some(id) = id_clone.get() {
                    Runtime::current().execute(id);
                }
            })))
        });
        id.set(Some(created));

        runtime.run(|| runtime.execute(created));

        // Only the outer run's predecessor was cleaned up.
        assert_eq!(cleanups.get(), 1);
        assert_eq!(runtime.graph().take_cleanups(created).len(), 1);
    }

    #[test]
    fn on_cleanup_outside_computation_fails() {
        assert_eq!(on_cleanup(|| {}), Err(ReactiveError::NoActiveComputation));
    }

    #[test]
    fn reset_clears_depth_and_queue() {
        let runtime = Runtime::new();
        let _transaction = Transaction::begin(&runtime);
        assert_eq!(runtime.stats().depth, 1);

        runtime.reset();
        assert_eq!(runtime.stats(), RuntimeStats::default());
    }

    #[test]
    fn config_defaults() {
        assert_eq!(RuntimeConfig::default().max_flush_rounds, DEFAULT_MAX_FLUSH_ROUNDS);
        let runtime = Runtime::with_config(RuntimeConfig { max_flush_rounds: 3 });
        assert_eq!(runtime.config().max_flush_rounds, 3);
    }

    #[test]
    fn panic_message_downcasts() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
