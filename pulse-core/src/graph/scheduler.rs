//! Update Scheduler
//!
//! The scheduler owns one runtime's dependency graph and its pending queue.
//! It is pure bookkeeping: nothing in here calls user code, so every method
//! can run under the runtime's `RefCell` borrow. Executing work happens one
//! layer up, in [`Runtime`](crate::reactive::Runtime), with the borrow
//! released.
//!
//! # Queueing
//!
//! Subscribers notified while a transaction is open or a flush is running
//! go into `pending`, an insertion-ordered set. A flush proceeds in rounds:
//!
//! 1. Move `pending` into `round`.
//! 2. Hand out the waiting id with the lowest height, oldest first on ties.
//! 3. A subscriber notified during the round joins it unless it already ran
//!    this round, in which case it goes into `pending` for the next one.
//! 4. Repeat until `pending` stays empty or the round cap is hit.
//!
//! # Heights
//!
//! A plain cell sits at height 0. A cell written by a derived value's
//! subscriber (its owner) sits at the owner's height. A subscriber's height
//! is one more than the highest cell it read in its last run. Draining by
//! height means every derived value upstream of a subscriber settles before
//! that subscriber runs, so it runs once per round and never sees a mix of
//! fresh and stale inputs.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexSet;
use slab::Slab;
use tracing::trace;

use super::node::{CellId, CellNode, Cleanup, NodeKind, SubscriberId, SubscriberNode};

/// The subscriber currently being tracked plus the stamp of its run.
pub type Observer = (SubscriberId, u64);

/// Per-runtime graph state: arenas, active observer, transaction depth and
/// the pending queue.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    cells: Slab<CellNode>,
    subscribers: Slab<SubscriberNode>,
    next_serial: u64,

    active: Option<Observer>,
    generation: u64,

    depth: usize,
    flushing: bool,
    pending: IndexSet<SubscriberId>,
    round: IndexSet<SubscriberId>,
    ran: HashSet<SubscriberId>,

    groups: HashMap<Rc<str>, IndexSet<SubscriberId>>,
    current_group: Option<Rc<str>>,
}

impl UpdateScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    /// Allocate a cell node.
    pub fn insert_cell(&mut self) -> CellId {
        let serial = self.serial();
        let index = self.cells.insert(CellNode::new(serial));
        CellId::new(index, serial)
    }

    /// Look up a live cell.
    pub fn cell(&self, id: CellId) -> Option<&CellNode> {
        self.cells
            .get(id.index())
            .filter(|node| node.serial == id.serial())
    }

    fn cell_mut(&mut self, id: CellId) -> Option<&mut CellNode> {
        self.cells
            .get_mut(id.index())
            .filter(|node| node.serial == id.serial())
    }

    /// Remove a cell.
    ///
    /// Listeners attached to nothing but this cell can never fire again, so
    /// they are removed too and handed back for the caller to drop outside
    /// any borrow.
    pub fn remove_cell(&mut self, id: CellId) -> Vec<SubscriberNode> {
        let Some(cell) = self.cell(id) else {
            return Vec::new();
        };
        let subscribers: Vec<SubscriberId> = cell.subscribers.iter().copied().collect();
        self.cells.remove(id.index());

        let mut orphans = Vec::new();
        for sub in subscribers {
            let orphaned = match self.subscriber_mut(sub) {
                Some(node) => {
                    node.deps.retain(|dep| *dep != id);
                    matches!(node.kind, NodeKind::Listener(_)) && node.deps.is_empty()
                }
                None => false,
            };
            if orphaned {
                orphans.extend(self.remove_subscriber(sub));
            }
        }
        orphans
    }

    /// Record the subscriber that writes `cell`.
    pub fn set_owner(&mut self, cell: CellId, owner: SubscriberId) {
        if let Some(node) = self.cell_mut(cell) {
            node.owner = Some(owner);
        }
    }

    /// Height of a cell: its owner's height, or 0 for a plain cell.
    pub fn cell_height(&self, id: CellId) -> u32 {
        self.cell(id)
            .and_then(|cell| cell.owner)
            .map_or(0, |owner| self.height_of(owner))
    }

    /// Snapshot of a cell's subscribers.
    ///
    /// Callers iterate the copy, never the live set, since running any of
    /// these subscribers may add or remove entries.
    pub fn subscribers_of(&self, id: CellId) -> Vec<SubscriberId> {
        self.cell(id)
            .map(|cell| cell.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Allocate a subscriber node, tagging it with the current group.
    pub fn insert_subscriber(&mut self, kind: NodeKind) -> SubscriberId {
        let serial = self.serial();
        let group = self.current_group.clone();
        let index = self
            .subscribers
            .insert(SubscriberNode::new(serial, kind, group.clone()));
        let id = SubscriberId::new(index, serial);

        if let Some(group) = group {
            self.groups.entry(group).or_default().insert(id);
        }
        id
    }

    /// Look up a live subscriber.
    pub fn subscriber(&self, id: SubscriberId) -> Option<&SubscriberNode> {
        self.subscribers
            .get(id.index())
            .filter(|node| node.serial == id.serial())
    }

    fn subscriber_mut(&mut self, id: SubscriberId) -> Option<&mut SubscriberNode> {
        self.subscribers
            .get_mut(id.index())
            .filter(|node| node.serial == id.serial())
    }

    /// Whether the subscriber is still in the arena.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscriber(id).is_some()
    }

    /// Height of a subscriber, 0 if it is gone.
    pub fn height_of(&self, id: SubscriberId) -> u32 {
        self.subscriber(id).map_or(0, SubscriberNode::height)
    }

    /// The node's tag, cloned so it can be run after the borrow is gone.
    pub fn kind_of(&self, id: SubscriberId) -> Option<NodeKind> {
        self.subscriber(id).map(|node| node.kind.clone())
    }

    /// Remove a subscriber and every edge that points at it.
    ///
    /// Returns the node, still holding its pending cleanups, or `None` if it
    /// was already gone.
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> Option<SubscriberNode> {
        self.subscriber(id)?;
        self.unlink(id);
        let node = self.subscribers.remove(id.index());

        self.pending.shift_remove(&id);
        self.round.shift_remove(&id);
        if let Some(group) = &node.group {
            if let Some(members) = self.groups.get_mut(group) {
                members.shift_remove(&id);
                if members.is_empty() {
                    self.groups.remove(group);
                }
            }
        }
        Some(node)
    }

    /// Drop every dependency edge of a subscriber, in both directions.
    ///
    /// The height goes back to 0 and is rebuilt by the next run's reads.
    pub fn unlink(&mut self, id: SubscriberId) {
        let Some(node) = self.subscriber_mut(id) else {
            return;
        };
        node.height = 0;
        let deps = std::mem::take(&mut node.deps);
        for cell in deps {
            if let Some(cell) = self.cell_mut(cell) {
                cell.subscribers.shift_remove(&id);
            }
        }
    }

    /// Attach a subscriber to a cell permanently (listeners).
    pub fn subscribe(&mut self, cell: CellId, id: SubscriberId) {
        let Some(cell_node) = self.cell_mut(cell) else {
            return;
        };
        cell_node.subscribers.insert(id);
        let height = self.cell_height(cell) + 1;
        if let Some(node) = self.subscriber_mut(id) {
            node.add_dependency(cell);
            node.height = node.height.max(height);
        }
    }

    /// Take the cleanups registered during a subscriber's last run.
    pub fn take_cleanups(&mut self, id: SubscriberId) -> Vec<Cleanup> {
        self.subscriber_mut(id)
            .map(SubscriberNode::take_cleanups)
            .unwrap_or_default()
    }

    /// Register a cleanup on the active observer.
    ///
    /// Hands the cleanup back if nothing is running.
    pub fn push_cleanup(&mut self, cleanup: Cleanup) -> Result<(), Cleanup> {
        let Some((id, _)) = self.active else {
            return Err(cleanup);
        };
        match self.subscriber_mut(id) {
            Some(node) => {
                node.cleanups.push(cleanup);
                Ok(())
            }
            None => Err(cleanup),
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Make `id` the active observer for a new run and return the observer
    /// it replaces.
    pub fn begin_tracking(&mut self, id: SubscriberId) -> Option<Observer> {
        self.generation += 1;
        let stamp = self.generation;
        if let Some(node) = self.subscriber_mut(id) {
            node.stamp = stamp;
        }
        self.active.replace((id, stamp))
    }

    /// Clear the active observer and return the previous one.
    pub fn suspend_tracking(&mut self) -> Option<Observer> {
        self.active.take()
    }

    /// Put back an observer saved by [`begin_tracking`](Self::begin_tracking)
    /// or [`suspend_tracking`](Self::suspend_tracking).
    pub fn restore_tracking(&mut self, previous: Option<Observer>) {
        self.active = previous;
    }

    /// The active observer, if any.
    pub fn active(&self) -> Option<SubscriberId> {
        self.active.map(|(id, _)| id)
    }

    /// Current value of the generation counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record that the active observer read `cell`.
    ///
    /// Registers the two-way edge at most once per run.
    pub fn track(&mut self, cell: CellId) {
        let Some((id, stamp)) = self.active else {
            return;
        };
        if self.subscriber(id).is_none() {
            return;
        }
        let Some(cell_node) = self.cell_mut(cell) else {
            return;
        };
        if cell_node.tracked_at == stamp {
            return;
        }
        cell_node.tracked_at = stamp;
        cell_node.subscribers.insert(id);

        let height = self.cell_height(cell) + 1;
        if let Some(node) = self.subscriber_mut(id) {
            node.add_dependency(cell);
            node.height = node.height.max(height);
        }
        trace!(cell = cell.index(), subscriber = id.index(), "tracked read");
    }

    // ------------------------------------------------------------------
    // Transactions and the pending queue
    // ------------------------------------------------------------------

    /// Open a transaction level.
    pub fn begin_batch(&mut self) {
        self.depth += 1;
    }

    /// Close a transaction level and return the remaining depth.
    pub fn end_batch(&mut self) -> usize {
        self.depth = self.depth.saturating_sub(1);
        self.depth
    }

    /// Current transaction depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether notifications must be queued instead of run.
    pub fn is_deferring(&self) -> bool {
        self.depth > 0 || self.flushing
    }

    /// Whether a flush is in progress.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Whether the queue should be drained now.
    pub fn should_flush(&self) -> bool {
        !self.is_deferring() && !self.pending.is_empty()
    }

    /// Queue a subscriber. Returns `false` if it was already waiting.
    ///
    /// During a flush, a subscriber that has not run yet this round joins
    /// the current round.
    pub fn enqueue(&mut self, id: SubscriberId) -> bool {
        let queued = if self.flushing && !self.ran.contains(&id) {
            self.round.insert(id)
        } else {
            self.pending.insert(id)
        };
        if queued {
            trace!(subscriber = id.index(), "queued");
        }
        queued
    }

    /// Number of subscribers waiting for the next round.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Mark the start of a flush. Returns `false` if one is already running.
    pub fn begin_flush(&mut self) -> bool {
        if self.flushing {
            return false;
        }
        self.flushing = true;
        true
    }

    /// Mark the end of a flush.
    pub fn end_flush(&mut self) {
        self.flushing = false;
        self.round.clear();
        self.ran.clear();
    }

    /// Move the pending queue into the current round.
    ///
    /// Returns `false` when there is nothing to run.
    pub fn start_round(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.round = std::mem::take(&mut self.pending);
        self.ran.clear();
        true
    }

    /// Take the lowest waiting subscriber of the current round.
    pub fn next_in_round(&mut self) -> Option<SubscriberId> {
        let (position, _) = self
            .round
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| self.height_of(**id))?;
        let id = self.round.shift_remove_index(position)?;
        self.ran.insert(id);
        Some(id)
    }

    /// Drop everything still queued and return how much was dropped.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Set the group for subsequently created subscribers.
    pub fn set_group(&mut self, group: Option<Rc<str>>) -> Option<Rc<str>> {
        std::mem::replace(&mut self.current_group, group)
    }

    /// Detach a group from the registry and return its members.
    pub fn take_group(&mut self, group: &str) -> Vec<SubscriberId> {
        self.groups
            .remove(group)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default()
    }

    /// Number of live subscribers in a group.
    pub fn group_len(&self, group: &str) -> usize {
        self.groups.get(group).map_or(0, IndexSet::len)
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Return depth, queues, active observer and group tag to defaults.
    /// Cells and subscribers stay registered.
    pub fn reset(&mut self) {
        self.active = None;
        self.depth = 0;
        self.flushing = false;
        self.pending.clear();
        self.round.clear();
        self.ran.clear();
        self.current_group = None;
    }

    /// Number of live cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn computation(scheduler: &mut UpdateScheduler) -> SubscriberId {
        scheduler.insert_subscriber(NodeKind::Computation(Rc::new(RefCell::new(|| {}))))
    }

    fn listener(scheduler: &mut UpdateScheduler) -> SubscriberId {
        scheduler.insert_subscriber(NodeKind::Listener(Rc::new(RefCell::new(|| {}))))
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let cell = scheduler.insert_cell();
        let sub = computation(&mut scheduler);

        assert_eq!(scheduler.cell_count(), 1);
        assert_eq!(scheduler.subscriber_count(), 1);

        assert!(scheduler.remove_subscriber(sub).is_some());
        assert!(scheduler.remove_subscriber(sub).is_none());
        assert_eq!(scheduler.subscriber_count(), 0);
        assert!(scheduler.cell(cell).is_some());
    }

    #[test]
    fn stale_ids_do_not_resolve_after_slot_reuse() {
        let mut scheduler = UpdateScheduler::new();

        let first = computation(&mut scheduler);
        scheduler.remove_subscriber(first);
        let second = computation(&mut scheduler);

        assert_eq!(first.index(), second.index());
        assert!(!scheduler.contains(first));
        assert!(scheduler.contains(second));
    }

    #[test]
    fn tracking_registers_edges_once_per_run() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.insert_cell();
        let sub = computation(&mut scheduler);

        let previous = scheduler.begin_tracking(sub);
        scheduler.track(cell);
        scheduler.track(cell);
        scheduler.track(cell);
        scheduler.restore_tracking(previous);

        assert_eq!(scheduler.subscribers_of(cell), vec![sub]);
        assert_eq!(scheduler.subscriber(sub).unwrap().dependencies(), &[cell]);
    }

    #[test]
    fn reads_outside_tracking_leave_no_edges() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.insert_cell();

        scheduler.track(cell);
        assert!(scheduler.subscribers_of(cell).is_empty());
    }

    #[test]
    fn unlink_clears_both_directions() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.insert_cell();
        let b = scheduler.insert_cell();
        let sub = computation(&mut scheduler);

        let previous = scheduler.begin_tracking(sub);
        scheduler.track(a);
        scheduler.track(b);
        scheduler.restore_tracking(previous);

        scheduler.unlink(sub);

        assert!(scheduler.subscribers_of(a).is_empty());
        assert!(scheduler.subscribers_of(b).is_empty());
        assert!(scheduler.subscriber(sub).unwrap().dependencies().is_empty());
    }

    #[test]
    fn enqueue_deduplicates_within_a_round() {
        let mut scheduler = UpdateScheduler::new();
        let first = computation(&mut scheduler);
        let second = computation(&mut scheduler);

        assert!(scheduler.enqueue(first));
        assert!(scheduler.enqueue(second));
        assert!(!scheduler.enqueue(first));

        assert!(scheduler.begin_flush());
        assert!(scheduler.start_round());
        assert_eq!(scheduler.next_in_round(), Some(first));

        // `second` is still waiting in this round.
        assert!(!scheduler.enqueue(second));
        // `first` already ran, so it goes to the next round.
        assert!(scheduler.enqueue(first));

        assert_eq!(scheduler.next_in_round(), Some(second));
        assert_eq!(scheduler.next_in_round(), None);
        assert!(scheduler.start_round());
        assert_eq!(scheduler.next_in_round(), Some(first));
        scheduler.end_flush();
        assert!(!scheduler.is_flushing());
    }

    #[test]
    fn rounds_drain_lowest_height_first() {
        let mut scheduler = UpdateScheduler::new();
        let source = scheduler.insert_cell();
        let derived = scheduler.insert_cell();
        let memo = computation(&mut scheduler);
        let reader = computation(&mut scheduler);

        let previous = scheduler.begin_tracking(memo);
        scheduler.track(source);
        scheduler.restore_tracking(previous);
        scheduler.set_owner(derived, memo);

        let previous = scheduler.begin_tracking(reader);
        scheduler.track(source);
        scheduler.track(derived);
        scheduler.restore_tracking(previous);

        assert_eq!(scheduler.height_of(memo), 1);
        assert_eq!(scheduler.cell_height(derived), 1);
        assert_eq!(scheduler.height_of(reader), 2);

        scheduler.enqueue(reader);
        scheduler.enqueue(memo);
        assert!(scheduler.begin_flush());
        assert!(scheduler.start_round());
        assert_eq!(scheduler.next_in_round(), Some(memo));

        // The memo's write reaches the reader while it still waits.
        assert!(!scheduler.enqueue(reader));
        assert_eq!(scheduler.next_in_round(), Some(reader));
        assert_eq!(scheduler.next_in_round(), None);
        assert!(!scheduler.start_round());
        scheduler.end_flush();
    }

    #[test]
    fn subscribers_notified_mid_round_join_it() {
        let mut scheduler = UpdateScheduler::new();
        let first = computation(&mut scheduler);
        let late = computation(&mut scheduler);

        scheduler.enqueue(first);
        assert!(scheduler.begin_flush());
        assert!(scheduler.start_round());
        assert_eq!(scheduler.next_in_round(), Some(first));

        assert!(scheduler.enqueue(late));
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(scheduler.next_in_round(), Some(late));
        scheduler.end_flush();
    }

    #[test]
    fn unlink_resets_height() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.insert_cell();
        let sub = computation(&mut scheduler);

        let previous = scheduler.begin_tracking(sub);
        scheduler.track(cell);
        scheduler.restore_tracking(previous);
        assert_eq!(scheduler.height_of(sub), 1);

        scheduler.unlink(sub);
        assert_eq!(scheduler.height_of(sub), 0);
    }

    #[test]
    fn depth_controls_deferral() {
        let mut scheduler = UpdateScheduler::new();
        let sub = computation(&mut scheduler);

        scheduler.begin_batch();
        scheduler.begin_batch();
        scheduler.enqueue(sub);
        assert!(scheduler.is_deferring());
        assert!(!scheduler.should_flush());

        assert_eq!(scheduler.end_batch(), 1);
        assert!(!scheduler.should_flush());
        assert_eq!(scheduler.end_batch(), 0);
        assert!(scheduler.should_flush());
    }

    #[test]
    fn removing_a_cell_drops_its_orphaned_listeners() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.insert_cell();
        let other = scheduler.insert_cell();
        let lonely = listener(&mut scheduler);
        let tracked = computation(&mut scheduler);

        scheduler.subscribe(cell, lonely);
        let previous = scheduler.begin_tracking(tracked);
        scheduler.track(cell);
        scheduler.track(other);
        scheduler.restore_tracking(previous);

        let orphans = scheduler.remove_cell(cell);

        assert_eq!(orphans.len(), 1);
        assert!(!scheduler.contains(lonely));
        assert_eq!(scheduler.subscriber(tracked).unwrap().dependencies(), &[other]);
    }

    #[test]
    fn groups_track_membership() {
        let mut scheduler = UpdateScheduler::new();

        scheduler.set_group(Some(Rc::from("module-a")));
        let a1 = computation(&mut scheduler);
        let a2 = computation(&mut scheduler);
        scheduler.set_group(None);
        let loose = computation(&mut scheduler);

        assert_eq!(scheduler.group_len("module-a"), 2);
        scheduler.remove_subscriber(a1);
        assert_eq!(scheduler.group_len("module-a"), 1);

        assert_eq!(scheduler.take_group("module-a"), vec![a2]);
        assert_eq!(scheduler.group_len("module-a"), 0);
        assert!(scheduler.contains(loose));
    }

    #[test]
    fn push_cleanup_requires_an_active_observer() {
        let mut scheduler = UpdateScheduler::new();
        let sub = computation(&mut scheduler);

        assert!(scheduler.push_cleanup(Box::new(|| {})).is_err());

        let previous = scheduler.begin_tracking(sub);
        assert!(scheduler.push_cleanup(Box::new(|| {})).is_ok());
        scheduler.restore_tracking(previous);

        assert_eq!(scheduler.take_cleanups(sub).len(), 1);
    }

    #[test]
    fn reset_keeps_nodes() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.insert_cell();
        let sub = computation(&mut scheduler);

        scheduler.begin_batch();
        scheduler.enqueue(sub);
        scheduler.begin_tracking(sub);

        scheduler.reset();

        assert_eq!(scheduler.depth(), 0);
        assert_eq!(scheduler.pending_len(), 0);
        assert!(scheduler.active().is_none());
        assert!(scheduler.cell(cell).is_some());
        assert!(scheduler.contains(sub));
    }
}
