//! Counter source: emits a fixed number of scalar readings per tick.
//!
//! The value is a counter that increases by one per record, which makes gaps
//! (dropped batches) and ordering easy to check downstream.
//!
//! ```toml
//! [[sources]]
//! label = "counter"
//! driver = "mock_counter"
//! process_rate_hz = 10.0
//! [sources.params]
//! records_per_tick = 1
//! unit = "count"
//! ```

use super::fault::FaultConfig;
use crate::error::DriverError;
use crate::observation::{Observation, Payload};
use crate::source::{Source, SourceConfig, SourceFactory};
use chrono::Utc;
use serde::Deserialize;

/// Registry key for [`CounterSource`].
pub const DRIVER_TYPE: &str = "mock_counter";

/// `params` table of a `mock_counter` source.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterParams {
    /// Scalar records per acquire.
    #[serde(default = "default_records_per_tick")]
    pub records_per_tick: usize,
    /// Unit attached to every reading.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// First counter value.
    #[serde(default)]
    pub start: u64,
    /// Injected faults.
    #[serde(flatten)]
    pub faults: FaultConfig,
}

fn default_records_per_tick() -> usize {
    1
}

fn default_unit() -> String {
    "count".to_string()
}

impl CounterParams {
    fn parse(params: &toml::Value) -> Result<Self, DriverError> {
        params
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| DriverError::configuration(DRIVER_TYPE, e.to_string()))
    }
}

/// Factory for [`CounterSource`].
pub struct CounterFactory;

impl SourceFactory for CounterFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Mock Counter"
    }

    fn validate(&self, params: &toml::Value) -> Result<(), DriverError> {
        CounterParams::parse(params).map(|_| ())
    }

    fn build(&self, config: &SourceConfig) -> Result<Box<dyn Source>, DriverError> {
        let params = CounterParams::parse(&config.params)?;
        Ok(Box::new(CounterSource::new(
            &config.label,
            config.process_rate_hz,
            params,
        )))
    }
}

/// Simulated counter; values continue across acquisitions.
pub struct CounterSource {
    label: String,
    rate_hz: f64,
    params: CounterParams,
    next_value: u64,
    acquisitions: u64,
    initialized: bool,
}

impl CounterSource {
    /// Counter starting at `params.start`; `initialize` must run first.
    pub fn new(label: &str, rate_hz: f64, params: CounterParams) -> Self {
        Self {
            label: label.to_string(),
            rate_hz,
            next_value: params.start,
            params,
            acquisitions: 0,
            initialized: false,
        }
    }
}

impl Source for CounterSource {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.params.faults.check_initialize(DRIVER_TYPE)?;
        self.initialized = true;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<Observation>, DriverError> {
        if !self.initialized {
            return Err(DriverError::acquisition(DRIVER_TYPE, "acquire before initialize"));
        }
        self.params
            .faults
            .check_acquire(DRIVER_TYPE, self.acquisitions)?;
        self.acquisitions += 1;

        let timestamp = Utc::now();
        let records = (0..self.params.records_per_tick)
            .map(|_| {
                let value = self.next_value as f64;
                self.next_value += 1;
                Observation::new(
                    timestamp,
                    self.label.as_str(),
                    Payload::Scalar {
                        value,
                        unit: self.params.unit.clone(),
                    },
                )
            })
            .collect();
        Ok(records)
    }

    fn process_rate_hz(&self) -> f64 {
        self.rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(config: SourceConfig) -> Box<dyn Source> {
        CounterFactory.build(&config).expect("counter builds")
    }

    #[test]
    fn emits_records_per_tick_with_increasing_values() {
        let mut source = build(
            SourceConfig::new("c", DRIVER_TYPE, 10.0)
                .with_param("records_per_tick", 3)
                .with_param("start", 10),
        );
        source.initialize().expect("init");

        let first = source.acquire().expect("acquire");
        let second = source.acquire().expect("acquire");
        let values: Vec<f64> = first
            .iter()
            .chain(second.iter())
            .map(|o| match &o.payload {
                Payload::Scalar { value, .. } => *value,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        assert!(first.iter().all(|o| o.label == "c"));
        assert_eq!(source.process_rate_hz(), 10.0);
    }

    #[test]
    fn acquire_before_initialize_is_an_error() {
        let mut source = build(SourceConfig::new("c", DRIVER_TYPE, 1.0));
        assert!(source.acquire().is_err());
    }

    #[test]
    fn fail_after_is_honored() {
        let mut source = build(SourceConfig::new("c", DRIVER_TYPE, 1.0).with_param("fail_after", 1));
        source.initialize().expect("init");
        assert!(source.acquire().is_ok());
        assert!(source.acquire().is_err());
    }

    #[test]
    fn invalid_params_fail_validation() {
        let params = SourceConfig::new("c", DRIVER_TYPE, 1.0)
            .with_param("records_per_tick", "many")
            .params;
        assert!(CounterFactory.validate(&params).is_err());
    }
}
