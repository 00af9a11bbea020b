//! Pulse Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Automatic dependency tracking with per-run dependency sets
//! - Transactions that coalesce writes into a single propagation
//! - Isolated runtimes that share no state with each other
//!
//! Everything is single-threaded: handles are `Rc`-based and not `Send`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Reactive primitives, runtimes and transactions
//! - `graph`: Dependency graph and update queue
//! - `error`: Errors returned to callers
//!
//! # Example
//!
//! ```rust
//! use pulse_core::reactive::{Effect, Memo, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = Memo::new(move || source.get() * 2);
//!
//! // Create an effect
//! let (count_reader, doubled_reader) = (count.clone(), doubled.clone());
//! let _effect = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", count_reader.get(), doubled_reader.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! assert_eq!(doubled.get(), 10);
//! ```

pub mod reactive;
pub mod graph;
pub mod error;

pub use error::{ReactiveError, Result};
pub use reactive::{batch, effect, untrack, Effect, Memo, Runtime, Signal};
