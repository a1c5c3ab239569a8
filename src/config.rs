//! Grabber configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/grabber.toml` by default)
//! 2. environment variables prefixed with `DAQ_GRABBER_`, with `__`
//!    separating nested keys (`DAQ_GRABBER_GLOBAL__MAX_OBSERVATIONS=200`)
//!
//! # Example
//! ```no_run
//! use daq_grabber::config::GrabberConfig;
//!
//! let config = GrabberConfig::load_from("config/grabber.toml")?;
//! config.validate()?;
//! println!("{} sources", config.sources.len());
//! # Ok::<(), daq_grabber::error::GrabberError>(())
//! ```

use crate::error::{AppResult, GrabberError};
use crate::manager::ManagerSettings;
use crate::source::SourceConfig;
use crate::store::{DrainPolicy, DEFAULT_MAX_OBSERVATIONS};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// File read by [`GrabberConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "config/grabber.toml";
/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DAQ_GRABBER_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Whole configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrabberConfig {
    /// The `[global]` table.
    #[serde(default)]
    pub global: GlobalSettings,
    /// The `[[sources]]` entries in file order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// The `[global]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Pause between worker spawns.
    #[serde(default = "default_launch_gap")]
    pub time_between_launches_ms: u64,
    /// Records per drain the consumer expects; the store holds twice this.
    #[serde(default = "default_max_observations")]
    pub max_observations: usize,
    /// Pause between raising cancellation and joining workers.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
    /// Each drain takes `⌊len / drain_divisor⌋` records.
    #[serde(default = "default_drain_divisor")]
    pub drain_divisor: usize,
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_launch_gap() -> u64 {
    300
}

fn default_max_observations() -> usize {
    DEFAULT_MAX_OBSERVATIONS
}

fn default_grace_period() -> u64 {
    300
}

fn default_drain_divisor() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            time_between_launches_ms: default_launch_gap(),
            max_observations: default_max_observations(),
            grace_period_ms: default_grace_period(),
            drain_divisor: default_drain_divisor(),
            log_level: default_log_level(),
        }
    }
}

impl GlobalSettings {
    /// [`time_between_launches_ms`](Self::time_between_launches_ms) as a duration.
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.time_between_launches_ms)
    }

    /// [`grace_period_ms`](Self::grace_period_ms) as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl GrabberConfig {
    /// Load from the default path and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load `path` (absent files yield defaults), then apply the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path).extract().map_err(GrabberError::from)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(GrabberError::from)
    }

    /// Provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject unknown log levels, zero sizes, and duplicate labels among
    /// entries that would actually run.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.global.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(GrabberError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.global.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.global.max_observations == 0 {
            return Err(GrabberError::Configuration(
                "max_observations must be greater than 0".to_string(),
            ));
        }

        if self.global.drain_divisor == 0 {
            return Err(GrabberError::Configuration(
                "drain_divisor must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in self.sources.iter().filter(|s| !s.is_ignorable()) {
            if !seen.insert(source.label.as_str()) {
                return Err(GrabberError::Configuration(format!(
                    "Duplicate source label: {}",
                    source.label
                )));
            }
        }

        Ok(())
    }

    /// Manager settings from the `[global]` table. An invalid divisor falls
    /// back to halving; `validate` reports it.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            max_observations: self.global.max_observations,
            drain_policy: DrainPolicy::with_divisor(self.global.drain_divisor)
                .unwrap_or_default(),
        }
    }

    /// Every `[[sources]]` entry in file order. Ignored entries are kept so
    /// the manager can report them as skipped.
    pub fn source_configs(&self) -> Vec<SourceConfig> {
        self.sources.clone()
    }
}
