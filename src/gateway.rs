//! Consumer-facing read path.
//!
//! A drain hands the caller a [`DrainedBatch`]: the records removed from the
//! store, oldest first, plus how many were left behind. Turning those records
//! into whatever the calling environment understands is the job of a
//! [`HostConverter`]; [`JsonConverter`] is the one the CLI uses.

use crate::observation::{Observation, Payload};
use crate::store::ObservationStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Snapshot returned by a drain. The store keeps no reference to these
/// records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainedBatch {
    /// Removed records, oldest first.
    pub records: Vec<Observation>,
    /// Records still in the store right after this drain.
    pub remaining: usize,
}

impl DrainedBatch {
    /// Drain `store` once according to its drain policy.
    pub fn from_store(store: &ObservationStore) -> Self {
        let (records, remaining) = store.drain_counted();
        Self { records, remaining }
    }

    /// Number of drained records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the drain returned nothing.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(timestamp, payload)` pairs in timestamp order.
    pub fn into_pairs(self) -> Vec<(DateTime<Utc>, Payload)> {
        self.records
            .into_iter()
            .map(|o| (o.timestamp, o.payload))
            .collect()
    }

    /// Record count per source label.
    pub fn counts_by_label(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.label.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Translates drained records into a host environment's representation.
pub trait HostConverter {
    /// Host-side value for one batch.
    type Output;

    /// Convert without consuming the batch.
    fn convert(&self, batch: &DrainedBatch) -> Self::Output;
}

/// Renders a batch as a JSON array of `{ts, label, payload}` objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl JsonConverter {
    fn record(observation: &Observation) -> Value {
        json!({
            "ts": observation.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "label": observation.label,
            "payload": serde_json::to_value(&observation.payload).unwrap_or(Value::Null),
        })
    }
}

impl HostConverter for JsonConverter {
    type Output = Value;

    fn convert(&self, batch: &DrainedBatch) -> Value {
        Value::Array(batch.records.iter().map(Self::record).collect())
    }
}
