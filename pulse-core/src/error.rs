//! Error types surfaced to callers.
//!
//! Only misuse of the public API is reported here. Failures inside a running
//! computation are logged and contained at the run boundary.

use thiserror::Error;

/// Errors returned by the reactive primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A write or update was attempted on a derived value.
    #[error("cannot mutate a derived value")]
    ReadOnly,

    /// A cleanup was registered while no computation was running.
    #[error("on_cleanup called outside of a running computation")]
    NoActiveComputation,
}

/// Result alias for fallible reactive operations.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
