//! Criterion benchmarks for the flowsim coordinator.
//!
//! Benchmark groups:
//! - `small_plant`: 25 independent press lines (50 steps, 75 transports)
//! - `large_plant`: 400 press lines (800 steps, 1200 transports), where the
//!   `parallel` feature has partitions to spread across threads
//! - `serialization`: bitcode snapshot encode and decode

use criterion::{Criterion, criterion_group, criterion_main};
use flowsim_core::config::EngineConfig;
use flowsim_core::engine::Engine;
use flowsim_core::test_utils::*;

/// Build a plant of `lines` press lines and run it until material reaches
/// every stage.
fn warmed_plant(lines: usize) -> Engine {
    let (mut engine, _) = build(&parallel_lines(lines), EngineConfig::with_seed(1));
    run_ticks(&mut engine, 20);
    engine
}

fn bench_small_plant(c: &mut Criterion) {
    let mut group = c.benchmark_group("small_plant");
    group.sample_size(50);

    let mut engine = warmed_plant(25);

    group.bench_function("25_lines_tick", |b| {
        b.iter(|| engine.step().unwrap());
    });

    group.finish();
}

fn bench_large_plant(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_plant");
    group.sample_size(20);

    let mut engine = warmed_plant(400);

    group.bench_function("400_lines_tick", |b| {
        b.iter(|| engine.step().unwrap());
    });

    // Reconcile walks every inventory; measure the tick without it too.
    let (mut unchecked, _) = build(
        &parallel_lines(400),
        EngineConfig {
            check_invariants: false,
            ..EngineConfig::with_seed(1)
        },
    );
    run_ticks(&mut unchecked, 20);
    group.bench_function("400_lines_tick_unchecked", |b| {
        b.iter(|| unchecked.step().unwrap());
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    group.sample_size(30);

    let engine = warmed_plant(400);
    let data = engine.serialize().unwrap();

    group.bench_function("serialize_400_lines", |b| {
        b.iter(|| engine.serialize().unwrap());
    });

    group.bench_function("deserialize_400_lines", |b| {
        b.iter(|| Engine::deserialize(&data).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_small_plant,
    bench_large_plant,
    bench_serialization
);
criterion_main!(benches);
