//! Criterion benchmarks for the observation store hot paths.
//!
//! - merge-insert throughput for various batch sizes
//! - drain latency at capacity
//! - insert contention from several writer threads
//!
//! Run with: cargo bench --bench observation_store

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daq_grabber::observation::Observation;
use daq_grabber::store::ObservationStore;
use std::sync::Arc;
use std::thread;

fn batch(len: usize) -> Vec<Observation> {
    let now = Utc::now();
    (0..len)
        .map(|i| Observation::scalar(now + ChronoDuration::microseconds(i as i64), "bench", i as f64, "V"))
        .collect()
}

fn merge_insert_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_merge_insert");

    for batch_len in [1usize, 16, 256] {
        let store = ObservationStore::new(1_000_000);
        let template = batch(batch_len);

        group.throughput(Throughput::Elements(batch_len as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch_len), &batch_len, |b, _| {
            b.iter(|| {
                if store.len() + batch_len > store.capacity() {
                    store.clear();
                }
                black_box(store.merge_insert(template.clone()));
            });
        });
    }

    group.finish();
}

fn drain_at_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_drain");

    for max in [50usize, 5_000] {
        let store = ObservationStore::new(max);
        group.bench_with_input(BenchmarkId::new("half", max), &max, |b, &max| {
            b.iter(|| {
                store.clear();
                store.merge_insert(batch(max * 2));
                black_box(store.drain());
            });
        });
    }

    group.finish();
}

fn contended_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_contention");
    group.sample_size(20);

    for writers in [2usize, 8] {
        group.bench_with_input(BenchmarkId::new("writers", writers), &writers, |b, &writers| {
            b.iter(|| {
                let store = Arc::new(ObservationStore::new(100_000));
                let handles: Vec<_> = (0..writers)
                    .map(|_| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            for _ in 0..100 {
                                store.merge_insert(batch(10));
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().expect("writer thread");
                }
                black_box(store.len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    merge_insert_throughput,
    drain_at_capacity,
    contended_insert
);
criterion_main!(benches);
