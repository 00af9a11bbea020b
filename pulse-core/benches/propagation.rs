//! Benchmarks for write propagation.
//!
//! Run with: `cargo bench --package pulse-core --bench propagation`

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pulse_core::reactive::{batch, Effect, Memo, Runtime, Signal};

// ============================================================================
// Graph Builders
// ============================================================================

/// One signal read by `width` effects.
fn fan_out(width: usize) -> (Signal<i64>, Vec<Effect>) {
    let source = Signal::new(0);
    let sink = Rc::new(Cell::new(0i64));
    let effects = (0..width)
        .map(|_| {
            let (source, sink) = (source.clone(), sink.clone());
            Effect::new(move || sink.set(sink.get().wrapping_add(source.get())))
        })
        .collect();
    (source, effects)
}

/// A chain of `depth` eager memos ending in one effect.
fn chain(depth: usize) -> (Signal<i64>, Effect) {
    let source = Signal::new(0);
    let mut last = {
        let source = source.clone();
        Memo::new(move || source.get() + 1)
    };
    for _ in 1..depth {
        let previous = last.clone();
        last = Memo::new(move || previous.get() + 1);
    }
    let effect = Effect::new(move || {
        black_box(last.get());
    });
    (source, effect)
}

/// `width` lazy memos over one source, all read by a single effect.
fn lazy_diamond(width: usize) -> (Signal<i64>, Effect) {
    let source = Signal::new(0);
    let memos: Vec<Memo<i64>> = (0..width as i64)
        .map(|offset| {
            let source = source.clone();
            Memo::lazy(move || source.get() + offset)
        })
        .collect();
    let effect = Effect::new(move || {
        black_box(memos.iter().map(Memo::get).sum::<i64>());
    });
    (source, effect)
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [1, 16, 256] {
        group.bench_with_input(BenchmarkId::new("write", width), &width, |b, &width| {
            let runtime = Runtime::new();
            runtime.run(|| {
                let (source, _effects) = fan_out(width);
                b.iter(|| source.update(|v| v + 1));
            });
        });
    }
    group.finish();
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("memo_chain");
    for depth in [4, 32, 128] {
        group.bench_with_input(BenchmarkId::new("write", depth), &depth, |b, &depth| {
            let runtime = Runtime::new();
            runtime.run(|| {
                let (source, _effect) = chain(depth);
                b.iter(|| source.update(|v| v + 1));
            });
        });
    }
    group.finish();
}

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");
    for writes in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("lazy_diamond", writes), &writes, |b, &writes| {
            let runtime = Runtime::new();
            runtime.run(|| {
                let (source, _effect) = lazy_diamond(8);
                b.iter(|| {
                    batch(|| {
                        for _ in 0..writes {
                            source.update(|v| v + 1);
                        }
                    })
                });
            });
        });
    }
    group.finish();
}

fn bench_untracked_reads(c: &mut Criterion) {
    let signal = Signal::new(42i64);
    c.bench_function("signal_peek", |b| b.iter(|| black_box(signal.peek())));
    c.bench_function("signal_get_outside_computation", |b| {
        b.iter(|| black_box(signal.get()))
    });
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_chain,
    bench_batched_writes,
    bench_untracked_reads
);
criterion_main!(benches);
