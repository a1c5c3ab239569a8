//! Shared, bounded observation store.
//!
//! All source workers merge their batches into a single [`ObservationStore`]
//! and the consumer drains it through the gateway. The store is an ordered
//! multi-map keyed by timestamp, guarded by one exclusive lock that covers the
//! whole of every insert and drain.
//!
//! # Capacity policy
//!
//! The store holds at most `2 × max_observations` records. A batch that would
//! push it past that bound is rejected whole and reported as
//! [`InsertOutcome::Dropped`]; producers never block and a single worker's
//! batch never appears partially. Loss under sustained overload is accepted
//! in exchange for bounded memory.
//!
//! # Drain policy
//!
//! [`ObservationStore::drain`] removes the oldest `⌊len / divisor⌋` records
//! (divisor 2 by default), leaving `len − ⌊len / divisor⌋` behind. Repeated
//! drains of an idle store shrink it in `O(log n)` calls but stop once fewer
//! than `divisor` records remain (one record with the default halving); a
//! drain then returns nothing. Callers that need everything use
//! [`ObservationStore::drain_all`].

use crate::observation::Observation;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

/// Default number of observations the consumer is expected to fetch per
/// drain; the store bound is twice this.
pub const DEFAULT_MAX_OBSERVATIONS: usize = 50;

/// Fraction of the store a single drain removes, expressed as a divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    divisor: usize,
}

impl DrainPolicy {
    /// Drain `⌊len / 2⌋` records per call.
    pub const HALF: DrainPolicy = DrainPolicy { divisor: 2 };
    /// Drain everything per call.
    pub const ALL: DrainPolicy = DrainPolicy { divisor: 1 };

    /// Returns `None` for a zero divisor.
    pub fn with_divisor(divisor: usize) -> Option<Self> {
        (divisor > 0).then_some(Self { divisor })
    }

    /// Divisor applied to the store length on each drain.
    pub fn divisor(&self) -> usize {
        self.divisor
    }

    fn take_count(&self, len: usize) -> usize {
        len / self.divisor
    }
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self::HALF
    }
}

/// Result of a merge-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The whole batch was inserted.
    Accepted(usize),
    /// Nothing was inserted; the batch would have exceeded capacity.
    Dropped(usize),
}

impl InsertOutcome {
    /// Whether the batch was stored.
    pub fn is_accepted(&self) -> bool {
        matches!(self, InsertOutcome::Accepted(_))
    }
}

/// Running counters for a store. Updated while the store lock is held, so a
/// snapshot is always internally consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Batches inserted whole.
    pub accepted_batches: u64,
    /// Records inserted.
    pub accepted_records: u64,
    /// Batches rejected at capacity.
    pub dropped_batches: u64,
    /// Records in rejected batches.
    pub dropped_records: u64,
    /// Drain calls, including ones that returned nothing.
    pub drains: u64,
    /// Records handed out by drains.
    pub drained_records: u64,
    /// Largest size the store has reached.
    pub high_water_mark: usize,
}

/// Ordering key: timestamp first, then insertion sequence so that equal
/// timestamps never collide and keep their arrival order.
type Key = (DateTime<Utc>, u64);

#[derive(Default)]
struct Inner {
    records: BTreeMap<Key, Observation>,
    next_seq: u64,
    stats: StoreStats,
}

/// Capacity-bounded, concurrency-safe ordered collection of observations.
pub struct ObservationStore {
    max_observations: usize,
    policy: DrainPolicy,
    inner: Mutex<Inner>,
}

impl ObservationStore {
    /// Empty store bounded at `2 × max_observations`, halving on drain.
    pub fn new(max_observations: usize) -> Self {
        Self::with_policy(max_observations, DrainPolicy::default())
    }

    /// Empty store with an explicit drain policy.
    pub fn with_policy(max_observations: usize, policy: DrainPolicy) -> Self {
        Self {
            max_observations,
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Upper bound on stored records: `2 × max_observations`.
    pub fn capacity(&self) -> usize {
        self.max_observations.saturating_mul(2)
    }

    /// Expected records per drain; half the capacity.
    pub fn max_observations(&self) -> usize {
        self.max_observations
    }

    /// Drain policy fixed at construction.
    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    /// Records currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent snapshot of the running counters.
    pub fn stats(&self) -> StoreStats {
        self.inner.lock().stats
    }

    /// Insert a whole batch, or none of it if it would exceed capacity.
    pub fn merge_insert(&self, batch: Vec<Observation>) -> InsertOutcome {
        let count = batch.len();
        if count == 0 {
            return InsertOutcome::Accepted(0);
        }

        let capacity = self.capacity();
        let mut inner = self.inner.lock();

        if inner.records.len() + count > capacity {
            inner.stats.dropped_batches += 1;
            inner.stats.dropped_records += count as u64;
            trace!(
                batch = count,
                size = inner.records.len(),
                capacity,
                "Dropped batch (store full)"
            );
            return InsertOutcome::Dropped(count);
        }

        for observation in batch {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.records.insert((observation.timestamp, seq), observation);
        }

        let size = inner.records.len();
        let stats = &mut inner.stats;
        stats.accepted_batches += 1;
        stats.accepted_records += count as u64;
        stats.high_water_mark = stats.high_water_mark.max(size);

        InsertOutcome::Accepted(count)
    }

    /// Boolean form of [`merge_insert`](Self::merge_insert): `true` when the
    /// batch was stored.
    pub fn insert_accepted(&self, batch: Vec<Observation>) -> bool {
        self.merge_insert(batch).is_accepted()
    }

    /// Remove and return the oldest `⌊len / divisor⌋` observations in
    /// timestamp order. Never waits for data.
    pub fn drain(&self) -> Vec<Observation> {
        self.drain_counted().0
    }

    /// Like [`drain`](Self::drain), also returning how many records were
    /// left behind, both taken under the same lock.
    pub fn drain_counted(&self) -> (Vec<Observation>, usize) {
        let mut inner = self.inner.lock();
        let take = self.policy.take_count(inner.records.len());
        let drained = Self::take_oldest(&mut inner, take);
        (drained, inner.records.len())
    }

    /// Remove and return every stored observation in timestamp order.
    pub fn drain_all(&self) -> Vec<Observation> {
        let mut inner = self.inner.lock();
        let take = inner.records.len();
        Self::take_oldest(&mut inner, take)
    }

    /// Discard all stored observations without counting them as drained.
    pub fn clear(&self) {
        self.inner.lock().records.clear();
    }

    fn take_oldest(inner: &mut Inner, take: usize) -> Vec<Observation> {
        inner.stats.drains += 1;
        if take == 0 {
            return Vec::new();
        }

        let drained = match inner.records.keys().nth(take).copied() {
            Some(split_key) => {
                let rest = inner.records.split_off(&split_key);
                std::mem::replace(&mut inner.records, rest)
            }
            None => std::mem::take(&mut inner.records),
        };

        inner.stats.drained_records += drained.len() as u64;
        drained.into_values().collect()
    }
}

impl std::fmt::Debug for ObservationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationStore")
            .field("max_observations", &self.max_observations)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}
