//! Cache combinators.
//!
//! Thin wrappers over [`Memo`]; they hold no state of their own.

use super::memo::Memo;
use super::runtime::untrack;
use super::signal::Signal;

/// Anything that can be read like a signal.
pub trait Source {
    /// The value type produced by a read.
    type Value;

    /// Read and track.
    fn get(&self) -> Self::Value;

    /// Read without tracking.
    fn peek(&self) -> Self::Value;
}

impl<T: Clone + 'static> Source for Signal<T> {
    type Value = T;

    fn get(&self) -> T {
        Signal::get(self)
    }

    fn peek(&self) -> T {
        Signal::peek(self)
    }
}

impl<T: Clone + 'static> Source for Memo<T> {
    type Value = T;

    fn get(&self) -> T {
        Memo::get(self)
    }

    fn peek(&self) -> T {
        Memo::peek(self)
    }
}

/// A fixed set of sources read together.
pub trait Dependencies {
    /// The values of every source, in order.
    type Values;

    /// Read every source, tracking each one.
    fn read(&self) -> Self::Values;
}

impl<T: Clone + 'static> Dependencies for Signal<T> {
    type Values = T;

    fn read(&self) -> T {
        self.get()
    }
}

impl<T: Clone + 'static> Dependencies for Memo<T> {
    type Values = T;

    fn read(&self) -> T {
        self.get()
    }
}

macro_rules! impl_dependencies {
    ($($source:ident),+) => {
        impl<$($source: Source),+> Dependencies for ($($source,)+) {
            type Values = ($($source::Value,)+);

            #[allow(non_snake_case)]
            fn read(&self) -> Self::Values {
                let ($($source,)+) = self;
                ($($source.get(),)+)
            }
        }
    };
}

impl_dependencies!(A);
impl_dependencies!(A, B);
impl_dependencies!(A, B, C);
impl_dependencies!(A, B, C, D);
impl_dependencies!(A, B, C, D, E);

/// A lazy derived value: nothing runs until the first read, and an input
/// change costs one derivation at the next read.
pub fn memo<T: Clone + 'static>(derive: impl FnMut() -> T + 'static) -> Memo<T> {
    Memo::lazy(derive)
}

/// A derived value that depends on `deps` and nothing else.
///
/// `derive` receives the current values of `deps` and runs untracked, so
/// signals it reads on its own do not become dependencies.
pub fn derived<D, T, F>(deps: D, mut derive: F) -> Memo<T>
where
    D: Dependencies + 'static,
    T: Clone + PartialEq + 'static,
    F: FnMut(D::Values) -> T + 'static,
{
    Memo::new(move || {
        let values = deps.read();
        untrack(|| derive(values))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn memo_is_lazy() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let cached = memo(move || {
            calls_clone.set(calls_clone.get() + 1);
            "value"
        });

        assert_eq!(calls.get(), 0);
        assert_eq!(cached.get(), "value");
        assert_eq!(cached.get(), "value");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn derived_tracks_only_listed_dependencies() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let ignored = Signal::new(100);

        let extra = ignored.clone();
        let sum = derived((a.clone(), b.clone()), move |(a, b)| a + b + extra.get());
        assert_eq!(sum.get(), 103);

        ignored.set(1000);
        assert_eq!(sum.get(), 103);

        a.set(10);
        assert_eq!(sum.get(), 1012);
    }

    #[test]
    fn derived_from_single_source_and_memo() {
        let base = Signal::new(3);
        let squared = derived(base.clone(), |v| v * v);
        let label = derived((squared.clone(), base.clone()), |(sq, b)| format!("{b}^2={sq}"));

        let seen = Rc::new(Cell::new(0));
        let (reader, seen_clone) = (squared.clone(), seen.clone());
        let _effect = Effect::new(move || seen_clone.set(reader.get()));

        base.set(4);
        assert_eq!(seen.get(), 16);
        assert_eq!(label.get(), "4^2=16");
    }

    #[test]
    fn sources_read_without_tracking_through_peek() {
        let signal = Signal::new(5);
        let lazy = memo({
            let signal = signal.clone();
            move || signal.get() + 1
        });
        assert_eq!(Source::peek(&signal), 5);
        assert_eq!(Source::peek(&lazy), 6);
    }
}
