//! Benchmarks for the per-request aggregation hot path

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use procmon_engine::{
    config::EngineConfig, engine::StatsEngine, platform::FixedProbe, sample::Sample,
    store::MemoryStore, RunningAggregate,
};

fn sample() -> Sample {
    Sample {
        response_time: 0.042,
        memory_bytes: 48 * 1024 * 1024,
        vm_peak_bytes: 128 * 1024 * 1024,
        thread_count: 8,
        user_cpu_seconds: 0.004,
        system_cpu_seconds: 0.001,
        db_query_count: None,
        is_exception: false,
    }
}

fn bench_aggregate_update(c: &mut Criterion) {
    c.bench_function("aggregate_update", |b| {
        let mut aggregate = RunningAggregate::new();
        let mut value = 0.0f64;
        b.iter(|| {
            value += 0.001;
            aggregate.update(black_box(value)).unwrap();
        });
    });
}

fn bench_aggregate_merge(c: &mut Criterion) {
    let mut left = RunningAggregate::new();
    let mut right = RunningAggregate::new();
    for i in 0..1000 {
        left.update(i as f64).unwrap();
        right.update((i * 2) as f64).unwrap();
    }

    c.bench_function("aggregate_merge", |b| {
        b.iter(|| {
            let mut merged = black_box(left);
            merged.merge(black_box(&right)).unwrap();
            merged
        });
    });
}

fn bench_ingest_steady_state(c: &mut Criterion) {
    let engine = StatsEngine::new(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(FixedProbe::new([100])),
        9000,
        Utc::now(),
    );
    let sample = sample();
    // creation event happens once, outside the measured loop
    engine.ingest(100, &sample).unwrap();

    c.bench_function("ingest_steady_state", |b| {
        b.iter(|| engine.ingest(black_box(100), black_box(&sample)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_aggregate_update,
    bench_aggregate_merge,
    bench_ingest_steady_state
);
criterion_main!(benches);
