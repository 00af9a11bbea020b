//! Transactions
//!
//! A transaction raises its runtime's depth counter so that writes made
//! inside it are queued instead of run. When the outermost transaction
//! closes, the queue is flushed once. Nested transactions share the same
//! counter; only the last one out triggers the flush.

use std::thread;

use super::runtime::Runtime;

/// Guard for an open transaction.
///
/// Prefer [`batch`] or [`Runtime::batch`]; the guard form exists for code
/// that cannot wrap its writes in a closure.
pub struct Transaction {
    runtime: Runtime,
}

impl Transaction {
    /// Open a transaction on `runtime`.
    pub fn begin(runtime: &Runtime) -> Self {
        runtime.graph().begin_batch();
        Self {
            runtime: runtime.clone(),
        }
    }

    /// Run `f` inside a transaction on the active runtime.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        Runtime::current().batch(f)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let flush_now = match self.runtime.try_graph() {
            Some(mut graph) => {
                graph.end_batch();
                graph.should_flush()
            }
            None => false,
        };
        // A panic unwinding through the transaction leaves the queue for the
        // next flush rather than running user code mid-unwind.
        if flush_now && !thread::panicking() {
            self.runtime.flush();
        }
    }
}

/// Run `f` inside a transaction on the active runtime and return its result.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().batch(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn batch_returns_the_closure_result() {
        assert_eq!(batch(|| 7), 7);
    }

    #[test]
    fn nested_batches_flush_once() {
        let runtime = Runtime::new();
        runtime.run(|| {
            let signal = Signal::new(0);
            let runs = Rc::new(Cell::new(0));
            let seen = Rc::new(Cell::new(-1));

            let _effect = {
                let signal = signal.clone();
                let runs = runs.clone();
                let seen = seen.clone();
                Effect::new(move || {
                    seen.set(signal.get());
                    runs.set(runs.get() + 1);
                })
            };

            batch(|| {
                signal.set(1);
                batch(|| {
                    signal.set(2);
                    assert_eq!(runtime.stats().depth, 2);
                });
                assert_eq!(runs.get(), 1);
                signal.set(3);
            });

            assert_eq!(runs.get(), 2);
            assert_eq!(seen.get(), 3);
            assert_eq!(runtime.stats().depth, 0);
        });
    }

    #[test]
    fn guard_form_defers_until_drop() {
        let runtime = Runtime::new();
        runtime.run(|| {
            let signal = Signal::new(0);
            let runs = Rc::new(Cell::new(0));
            let _effect = {
                let signal = signal.clone();
                let runs = runs.clone();
                Effect::new(move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                })
            };

            let transaction = Transaction::begin(&runtime);
            signal.set(1);
            signal.set(2);
            assert_eq!(runs.get(), 1);
            assert_eq!(runtime.stats().pending, 1);

            drop(transaction);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn panicking_batch_restores_depth() {
        let runtime = Runtime::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runtime.batch(|| panic!("inside batch"));
        }));

        assert!(result.is_err());
        assert_eq!(runtime.stats().depth, 0);
    }
}
