//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the runtime that schedules them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a computation is running, the signal registers that computation as a
//! dependent. When the value changes, every dependent is queued to run again.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. An eager memo re-derives
//! as soon as an input changes; a lazy memo only marks itself dirty and
//! re-derives on the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Before each run its previous dependencies and cleanups are dropped,
//! so only the reads of the latest run count.
//!
//! ## Transactions
//!
//! Writes inside [`batch`] are collected and flushed once when the outermost
//! batch closes. Within a flush, derived values settle before the
//! computations that read them, so each computation runs once per change
//! and never sees a half-updated graph.
//!
//! # Implementation Notes
//!
//! Every primitive belongs to a [`Runtime`]. A thread has a default runtime;
//! [`Runtime::run`] activates another one for the duration of a closure.
//! Runtimes share nothing, so writes in one never schedule work in another.

mod signal;
mod context;
mod subscriber;
mod memo;
mod effect;
mod runtime;
mod transaction;
pub mod cache;

pub use signal::{never_equal, same_value_f32, same_value_f64, Equality, Signal};
pub use context::{ReactiveContext, RuntimeScope};
pub use subscriber::Subscription;
pub use crate::graph::SubscriberId;
pub use memo::{Memo, MemoState};
pub use effect::{effect, Effect};
pub use runtime::{
    on_cleanup, untrack, with_runtime, Runtime, RuntimeConfig, RuntimeStats,
    DEFAULT_MAX_FLUSH_ROUNDS,
};
pub use transaction::{batch, Transaction};
