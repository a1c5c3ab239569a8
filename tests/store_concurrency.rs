//! Concurrent producers and a draining consumer on one store.

use chrono::{DateTime, TimeZone, Utc};
use daq_grabber::observation::Observation;
use daq_grabber::store::{InsertOutcome, ObservationStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn ts(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(micros / 1_000_000, (micros % 1_000_000) as u32 * 1_000)
        .single()
        .expect("valid timestamp")
}

/// Batches of `batch_len` records whose timestamps are `base + i`.
fn batches(label: &str, base: i64, count: usize, batch_len: usize) -> Vec<Vec<Observation>> {
    (0..count)
        .map(|b| {
            (0..batch_len)
                .map(|i| {
                    let t = base + (b * batch_len + i) as i64;
                    Observation::scalar(ts(t), label, t as f64, "count")
                })
                .collect()
        })
        .collect()
}

#[test]
fn concurrent_writers_final_size_matches_accepted() {
    const WRITERS: usize = 8;
    let store = Arc::new(ObservationStore::new(500));

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let base = (w as i64) * 1_000_000;
                let mut accepted = 0usize;
                for batch in batches(&format!("w{w}"), base, 50, 5) {
                    if let InsertOutcome::Accepted(n) = store.merge_insert(batch) {
                        accepted += n;
                    }
                }
                accepted
            })
        })
        .collect();

    let accepted: usize = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread"))
        .sum();

    // 8 writers × 250 records > capacity 1000, so some batches bounced.
    assert_eq!(store.len(), accepted);
    assert_eq!(store.len(), store.capacity());
    let stats = store.stats();
    assert_eq!(stats.accepted_records as usize, accepted);
    assert_eq!(stats.accepted_records + stats.dropped_records, 2000);
}

#[test]
fn size_never_exceeds_capacity_under_contention() {
    let store = Arc::new(ObservationStore::new(64));
    let running = Arc::new(AtomicBool::new(true));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for batch in batches("w", (w as i64) * 10_000_000, 2000, 3) {
                    store.merge_insert(batch);
                }
            })
        })
        .collect();

    let observer = {
        let store = Arc::clone(&store);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut max_seen = 0;
            while running.load(Ordering::Relaxed) {
                max_seen = max_seen.max(store.len());
                store.drain();
            }
            max_seen
        })
    };

    for writer in writers {
        writer.join().expect("writer thread");
    }
    running.store(false, Ordering::Relaxed);
    let max_seen = observer.join().expect("observer thread");

    assert!(max_seen <= store.capacity());
    assert!(store.stats().high_water_mark <= store.capacity());
}

#[test]
fn drains_are_disjoint_and_ordered_while_writing() {
    let store = Arc::new(ObservationStore::new(10_000));
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for batch in batches("w", 0, 500, 4) {
                assert!(store.insert_accepted(batch));
            }
        })
    };

    let mut drained = Vec::new();
    while !writer.is_finished() {
        drained.extend(store.drain());
    }
    writer.join().expect("writer thread");
    drained.extend(store.drain_all());

    assert_eq!(drained.len(), 2000);
    let mut values: Vec<i64> = drained.iter().map(|o| o.timestamp.timestamp_micros()).collect();
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 2000, "a record was returned twice");
}
