//! Observation records produced by source drivers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-specific content of an observation.
///
/// The acquisition core never inspects payloads; it only moves them from the
/// producing worker into the store and out again on drain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A single reading (power meter, thermometer, counter).
    Scalar {
        /// Reading.
        value: f64,
        /// Physical unit.
        unit: String,
    },
    /// A block of samples taken in one acquisition (ADC burst, spectrum).
    Samples {
        /// Samples in acquisition order.
        values: Vec<f64>,
        /// Physical unit shared by every sample.
        unit: String,
    },
    /// Free-form text (NMEA sentence, status line).
    Text(String),
    /// Raw device bytes.
    Raw(Vec<u8>),
}

impl Payload {
    /// Number of elements carried: 1 for a scalar, the sample count for
    /// samples, and the byte length for text and raw payloads.
    pub fn len(&self) -> usize {
        match self {
            Payload::Scalar { .. } => 1,
            Payload::Samples { values, .. } => values.len(),
            Payload::Text(text) => text.len(),
            Payload::Raw(bytes) => bytes.len(),
        }
    }

    /// Whether [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One timestamped unit of acquired data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Acquisition time; the store orders by it.
    pub timestamp: DateTime<Utc>,
    /// Label of the source that produced this observation.
    pub label: String,
    /// Driver data.
    pub payload: Payload,
}

impl Observation {
    /// Observation with an explicit timestamp.
    pub fn new(timestamp: DateTime<Utc>, label: impl Into<String>, payload: Payload) -> Self {
        Self {
            timestamp,
            label: label.into(),
            payload,
        }
    }

    /// Observation stamped with the current wall-clock time.
    pub fn now(label: impl Into<String>, payload: Payload) -> Self {
        Self::new(Utc::now(), label, payload)
    }

    /// Single-reading observation.
    pub fn scalar(
        timestamp: DateTime<Utc>,
        label: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self::new(
            timestamp,
            label,
            Payload::Scalar {
                value,
                unit: unit.into(),
            },
        )
    }
}
