//! Fault injection for mock sources.
//!
//! Lets configuration files and tests make a mock source fail at a chosen
//! point, so the worker's fatal-fault path can be exercised without hardware.

use crate::error::{DriverError, DriverErrorKind};
use serde::Deserialize;
use std::thread;
use std::time::Duration;

/// Injected failure points, read from a source's `params` table.
///
/// ```toml
/// [sources.params]
/// fail_on_init = false
/// fail_after = 20      # the 21st acquire returns an error
/// panic_after = 50     # the 51st acquire panics
/// acquire_delay_ms = 400 # every acquire blocks this long
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FaultConfig {
    /// Fail `initialize`.
    #[serde(default)]
    pub fail_on_init: bool,
    /// Return a hardware error once this many acquisitions have completed.
    #[serde(default)]
    pub fail_after: Option<u64>,
    /// Panic once this many acquisitions have completed.
    #[serde(default)]
    pub panic_after: Option<u64>,
    /// Block inside every acquire for this many milliseconds, ignoring
    /// cancellation, like a device stuck on a slow read.
    #[serde(default)]
    pub acquire_delay_ms: Option<u64>,
}

impl FaultConfig {
    /// No injected faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Fail with a hardware error after `count` good acquisitions.
    pub fn fail_after(count: u64) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    /// Error out of `initialize` when `fail_on_init` is set.
    pub fn check_initialize(&self, driver_type: &str) -> Result<(), DriverError> {
        if self.fail_on_init {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Initialization,
                "Injected initialization failure",
            ));
        }
        Ok(())
    }

    /// Check the fault points before acquisition number `completed + 1`,
    /// first blocking for `acquire_delay_ms` if set.
    ///
    /// # Panics
    ///
    /// Panics deliberately once `panic_after` acquisitions have completed.
    pub fn check_acquire(&self, driver_type: &str, completed: u64) -> Result<(), DriverError> {
        if let Some(ms) = self.acquire_delay_ms {
            thread::sleep(Duration::from_millis(ms));
        }
        if let Some(limit) = self.panic_after {
            if completed >= limit {
                panic!("Injected panic in '{driver_type}' after {limit} acquisitions");
            }
        }
        if let Some(limit) = self.fail_after {
            if completed >= limit {
                return Err(DriverError::new(
                    driver_type,
                    DriverErrorKind::Hardware,
                    format!("Injected failure after {limit} acquisitions"),
                ));
            }
        }
        Ok(())
    }
}
