//! Dependency Graph
//!
//! This module holds the bookkeeping behind every runtime: the arenas that
//! store cell and subscriber records, the edges between them, and the queue
//! of subscribers waiting to run.
//!
//! # Overview
//!
//! - Cells are sources. They know which subscribers read them.
//! - Subscribers are computations, plain listeners, or the tracking records
//!   of lazy derived values. They know which cells they read.
//!
//! When a cell changes, its subscribers are queued; the runtime drains the
//! queue in rounds, lowest height first, until nothing is left.
//!
//! # Design Decisions
//!
//! 1. Records live in `slab` arenas and refer to each other by id, so the
//!    cell/subscriber cycle never becomes an ownership cycle. Removing a
//!    node is removing an arena entry.
//!
//! 2. Ids carry a serial number. A handle to a removed node stays inert
//!    even after its slot is reused.
//!
//! 3. Both directions of every edge are stored, so a subscriber can drop
//!    all of its edges before re-running without scanning every cell.
//!
//! 4. Heights replace a full topological sort. Each run records how far its
//!    node sits above the plain cells, which is all the drain order needs.

mod node;
mod scheduler;

pub use node::{CellId, CellNode, Cleanup, Invalidate, NodeKind, SubscriberId, SubscriberNode, Work};
pub use scheduler::{Observer, UpdateScheduler};
