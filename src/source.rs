//! Source driver seam and driver registry.
//!
//! A *source* is anything a worker can poll at a fixed rate: a sensor, a
//! file replay, a simulated instrument. The acquisition core only needs the
//! small [`Source`] interface; drivers are looked up by identifier in a
//! [`SourceRegistry`] populated with [`SourceFactory`] implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Composition root (main.rs / tests)           │
//! │  registry.register_factory(CounterFactory)   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │ SourceRegistry                               │
//! │  factories: DashMap<driver, SourceFactory>   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼  (inside the worker thread)
//! ┌──────────────────────────────────────────────┐
//! │ SourceFactory::build(&SourceConfig)          │
//! │  -> Box<dyn Source>                          │
//! └──────────────────────────────────────────────┘
//! ```

use crate::error::DriverError;
use crate::observation::Observation;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Label reserved for the global settings section; never a source.
pub const GLOBAL_SECTION_NAME: &str = "global";

/// Per-source configuration handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique key for this source.
    pub label: String,
    /// Driver identifier, matched against [`SourceFactory::driver_type`].
    pub driver: String,
    /// Polling rate in Hz. Must be `> 0`.
    pub process_rate_hz: f64,
    /// Marks an entry the manager must skip.
    #[serde(default)]
    pub ignore: bool,
    /// Driver-specific parameters, opaque to the core.
    #[serde(default = "empty_params")]
    pub params: toml::Value,
}

fn empty_params() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl SourceConfig {
    /// Enabled entry with no driver parameters.
    pub fn new(label: impl Into<String>, driver: impl Into<String>, process_rate_hz: f64) -> Self {
        Self {
            label: label.into(),
            driver: driver.into(),
            process_rate_hz,
            ignore: false,
            params: empty_params(),
        }
    }

    /// Attach driver parameters.
    pub fn with_params(mut self, params: toml::Value) -> Self {
        self.params = params;
        self
    }

    /// Set a single driver parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        if let toml::Value::Table(table) = &mut self.params {
            table.insert(key.to_string(), value.into());
        }
        self
    }

    /// Mark the entry `ignore = true`.
    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// Whether this entry is a marker rather than a real source.
    pub fn is_ignorable(&self) -> bool {
        self.ignore || self.label.trim().is_empty() || self.label == GLOBAL_SECTION_NAME
    }

    /// Check the parameters the core itself depends on.
    pub fn validate(&self) -> Result<(), String> {
        validate_rate(self.process_rate_hz)
    }
}

/// A process rate is usable when it is finite and strictly positive.
pub fn validate_rate(rate_hz: f64) -> Result<(), String> {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        Ok(())
    } else {
        Err(format!(
            "process_rate_hz must be set to a valid value (> 0 Hz), got {rate_hz}"
        ))
    }
}

/// Loop period for a validated rate, rounded to whole milliseconds (min 1 ms).
pub fn period_ms(rate_hz: f64) -> u64 {
    ((1000.0 / rate_hz).round() as u64).max(1)
}

/// A pollable data source.
///
/// Implementations are owned by exactly one worker thread, so they only need
/// to be `Send`.
pub trait Source: Send {
    /// Driver identifier this source was built from.
    fn driver_type(&self) -> &str;

    /// Prepare the device. Called once before the first `acquire`.
    fn initialize(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Poll the device once and return everything it produced since the
    /// previous call. May return an empty vector.
    fn acquire(&mut self) -> Result<Vec<Observation>, DriverError>;

    /// Rate the worker should poll this source at, in Hz.
    fn process_rate_hz(&self) -> f64;
}

/// Builds [`Source`] instances for one driver identifier.
pub trait SourceFactory: Send + Sync + 'static {
    /// Identifier matched against `SourceConfig::driver`.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for listings and error messages.
    fn name(&self) -> &'static str;

    /// Check driver parameters without building anything.
    fn validate(&self, params: &toml::Value) -> Result<(), DriverError>;

    /// Instantiate a source for `config`.
    fn build(&self, config: &SourceConfig) -> Result<Box<dyn Source>, DriverError>;
}

/// Registered driver, as listed by [`SourceRegistry::factories`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryInfo {
    /// Registry key.
    pub driver_type: String,
    /// Display name.
    pub name: String,
}

/// Lookup from driver identifier to factory.
#[derive(Default)]
pub struct SourceRegistry {
    factories: DashMap<String, Box<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Registry with no drivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled mock drivers.
    pub fn with_mock_drivers() -> Self {
        let registry = Self::new();
        crate::drivers::register_all(&registry);
        registry
    }

    /// Register a factory, returning the one it replaced, if any.
    pub fn register_factory(
        &self,
        factory: Box<dyn SourceFactory>,
    ) -> Option<Box<dyn SourceFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::debug!(
            driver_type = %driver_type,
            name = %factory.name(),
            "Registering source factory"
        );
        self.factories.insert(driver_type, factory)
    }

    /// Whether `driver_type` has a factory.
    pub fn contains(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver identifiers, sorted.
    pub fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Registered factories, sorted by identifier.
    pub fn factories(&self) -> Vec<FactoryInfo> {
        let mut infos: Vec<FactoryInfo> = self
            .factories
            .iter()
            .map(|entry| FactoryInfo {
                driver_type: entry.value().driver_type().to_string(),
                name: entry.value().name().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.driver_type.cmp(&b.driver_type));
        infos
    }

    /// Validate parameters for `config.driver`. `None` if the driver is not
    /// registered.
    pub fn validate(&self, config: &SourceConfig) -> Option<Result<(), DriverError>> {
        self.factories
            .get(&config.driver)
            .map(|factory| factory.validate(&config.params))
    }

    /// Build a source for `config`. `None` if the driver is not registered.
    pub fn create(&self, config: &SourceConfig) -> Option<Result<Box<dyn Source>, DriverError>> {
        let factory = self.factories.get(&config.driver)?;
        Some(
            factory
                .validate(&config.params)
                .and_then(|()| factory.build(config)),
        )
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("drivers", &self.driver_types())
            .finish()
    }
}
