//! Graph Nodes
//!
//! This module defines the records that live in a runtime's arenas: cell
//! nodes (the sources of the graph) and subscriber nodes (everything that
//! reacts to a cell changing).
//!
//! Nodes never point at each other directly. A cell holds the ids of its
//! subscribers, a subscriber holds the ids of the cells it read, and both
//! sides are resolved through the owning [`UpdateScheduler`](super::UpdateScheduler).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

/// Work function of a computation or listener.
pub type Work = Rc<RefCell<dyn FnMut()>>;

/// Handler invoked when a lazy derivation's inputs change.
pub type Invalidate = Rc<dyn Fn()>;

/// A cleanup callback registered during a computation run.
pub type Cleanup = Box<dyn FnOnce()>;

/// Identifier of a cell node in a runtime's cell arena.
///
/// The serial guards against slot reuse: an id whose slot has since been
/// handed to another cell no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    index: usize,
    serial: u64,
}

impl CellId {
    pub(crate) fn new(index: usize, serial: u64) -> Self {
        Self { index, serial }
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

/// Identifier of a subscriber node (computation, listener or derivation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId {
    index: usize,
    serial: u64,
}

impl SubscriberId {
    pub(crate) fn new(index: usize, serial: u64) -> Self {
        Self { index, serial }
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

/// What a subscriber does when one of its cells notifies.
///
/// The scheduler branches on this tag instead of inspecting the callback.
#[derive(Clone)]
pub enum NodeKind {
    /// A tracked computation. Its edges are rebuilt on every run.
    Computation(Work),

    /// A plain listener attached to exactly one cell. Never tracks.
    Listener(Work),

    /// The tracking record of a lazy derived value. Notification only
    /// marks the value stale; the derivation runs on the next read.
    Derivation(Invalidate),
}

impl NodeKind {
    /// Short label used in log output.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Computation(_) => "computation",
            NodeKind::Listener(_) => "listener",
            NodeKind::Derivation(_) => "derivation",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cell record: who must hear about the next write.
#[derive(Debug)]
pub struct CellNode {
    pub(crate) serial: u64,

    /// Subscribers interested in this cell, unique, in registration order.
    pub(crate) subscribers: IndexSet<SubscriberId>,

    /// Generation stamp of the last run that registered an edge here.
    /// A second read within the same run skips the registration work.
    pub(crate) tracked_at: u64,

    /// The subscriber that writes this cell, for derived values. Readers of
    /// an owned cell sit one level above its owner.
    pub(crate) owner: Option<SubscriberId>,
}

impl CellNode {
    pub(crate) fn new(serial: u64) -> Self {
        Self {
            serial,
            subscribers: IndexSet::new(),
            tracked_at: 0,
            owner: None,
        }
    }

    /// Number of subscribers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// A subscriber record.
pub struct SubscriberNode {
    pub(crate) serial: u64,

    pub(crate) kind: NodeKind,

    /// Cells this node depends on. For computations and derivations this
    /// reflects the reads of the most recent run only.
    pub(crate) deps: SmallVec<[CellId; 4]>,

    /// Cleanups registered during the most recent run, in order.
    pub(crate) cleanups: Vec<Cleanup>,

    /// Generation stamp of the current (or last) run.
    pub(crate) stamp: u64,

    /// Disposal group this node was created under, if any.
    pub(crate) group: Option<Rc<str>>,

    /// Distance from the plain cells, as of the last run. A node reading
    /// only plain cells has height 1.
    pub(crate) height: u32,
}

impl SubscriberNode {
    pub(crate) fn new(serial: u64, kind: NodeKind, group: Option<Rc<str>>) -> Self {
        Self {
            serial,
            kind,
            deps: SmallVec::new(),
            cleanups: Vec::new(),
            stamp: 0,
            group,
            height: 0,
        }
    }

    /// The node's tag.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Cells read during the most recent run.
    pub fn dependencies(&self) -> &[CellId] {
        &self.deps
    }

    /// Position in the propagation order. Lower heights drain first.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn add_dependency(&mut self, cell: CellId) {
        if !self.deps.contains(&cell) {
            self.deps.push(cell);
        }
    }

    pub(crate) fn take_cleanups(&mut self) -> Vec<Cleanup> {
        std::mem::take(&mut self.cleanups)
    }
}

impl fmt::Debug for SubscriberNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberNode")
            .field("kind", &self.kind)
            .field("deps", &self.deps.len())
            .field("cleanups", &self.cleanups.len())
            .field("stamp", &self.stamp)
            .field("height", &self.height)
            .field("group", &self.group)
            .finish()
    }
}
