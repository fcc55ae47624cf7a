//! Benchmarks for submission throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use veda_exec::prelude::*;

fn bench_submit_join(c: &mut Criterion) {
    let pool = WorkerPool::new(PoolConfig::fixed(4)).unwrap();

    c.bench_function("submit_join", |b| {
        b.iter(|| pool.submit(|| black_box(21) * 2).unwrap().join().unwrap());
    });

    pool.shutdown();
    pool.await_termination(Duration::from_secs(5));
}

fn bench_submit_batch(c: &mut Criterion) {
    let pool = WorkerPool::new(PoolConfig::elastic(4, 8, 2048)).unwrap();

    c.bench_function("submit_batch_1000", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..1000u64)
                .map(|i| pool.submit(move || black_box(i * i)).unwrap())
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .sum::<u64>()
        });
    });

    pool.shutdown();
    pool.await_termination(Duration::from_secs(5));
}

fn bench_caller_runs_saturation(c: &mut Criterion) {
    let config = PoolConfig::builder()
        .core_size(2)
        .max_size(2)
        .queue_capacity(16)
        .rejection_policy(RejectionPolicy::CallerRuns)
        .build()
        .unwrap();
    let pool = WorkerPool::new(config).unwrap();

    c.bench_function("caller_runs_saturation", |b| {
        b.iter(|| {
            let latch = std::sync::Arc::new(CountdownLatch::new(256));
            for _ in 0..256 {
                let latch = latch.clone();
                pool.execute(move || latch.count_down()).unwrap();
            }
            latch.wait();
        });
    });

    pool.shutdown();
    pool.await_termination(Duration::from_secs(5));
}

fn bench_completion_tracker(c: &mut Criterion) {
    let pool = WorkerPool::new(PoolConfig::fixed(4)).unwrap();
    let tracker = CompletionTracker::new(pool);

    c.bench_function("completion_tracker_100", |b| {
        b.iter(|| {
            for i in 0..100u64 {
                tracker.submit_tracked(move || black_box(i)).unwrap();
            }
            (0..100)
                .map(|_| tracker.take().unwrap().join().unwrap())
                .sum::<u64>()
        });
    });
}

criterion_group!(
    benches,
    bench_submit_join,
    bench_submit_batch,
    bench_caller_runs_saturation,
    bench_completion_tracker
);
criterion_main!(benches);
