//! Simulated analog input: a noisy sine wave sampled in bursts.
//!
//! Each tick produces one `Payload::Samples` observation holding
//! `samples_per_tick` points. The phase carries over between ticks, so
//! concatenated bursts form a continuous waveform at an effective sample rate
//! of `samples_per_tick × process_rate_hz`.
//!
//! Noise comes from a seeded ChaCha RNG so test runs are reproducible.

use super::fault::FaultConfig;
use crate::error::DriverError;
use crate::observation::{Observation, Payload};
use crate::source::{Source, SourceConfig, SourceFactory};
use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::f64::consts::TAU;

/// Registry key for [`SignalSource`].
pub const DRIVER_TYPE: &str = "mock_signal";

/// `params` table of a `mock_signal` source.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalParams {
    /// Peak of the sine wave.
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// Sine frequency, independent of the acquisition rate.
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Samples in each burst.
    #[serde(default = "default_samples_per_tick")]
    pub samples_per_tick: usize,
    /// Peak noise added to each sample, uniformly distributed.
    #[serde(default)]
    pub noise: f64,
    /// Unit attached to every burst.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Fixed RNG seed for reproducible noise; entropy when absent.
    pub seed: Option<u64>,
    /// Injected faults.
    #[serde(flatten)]
    pub faults: FaultConfig,
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_frequency() -> f64 {
    1.0
}

fn default_samples_per_tick() -> usize {
    16
}

fn default_unit() -> String {
    "V".to_string()
}

impl SignalParams {
    fn parse(params: &toml::Value) -> Result<Self, DriverError> {
        let parsed: SignalParams = params
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| DriverError::configuration(DRIVER_TYPE, e.to_string()))?;

        if parsed.samples_per_tick == 0 {
            return Err(DriverError::configuration(
                DRIVER_TYPE,
                "samples_per_tick must be at least 1",
            ));
        }
        if !(parsed.noise >= 0.0 && parsed.noise.is_finite()) {
            return Err(DriverError::configuration(
                DRIVER_TYPE,
                format!("noise must be a finite value >= 0, got {}", parsed.noise),
            ));
        }
        Ok(parsed)
    }
}

/// Factory for [`SignalSource`].
pub struct SignalFactory;

impl SourceFactory for SignalFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Mock Analog Signal"
    }

    fn validate(&self, params: &toml::Value) -> Result<(), DriverError> {
        SignalParams::parse(params).map(|_| ())
    }

    fn build(&self, config: &SourceConfig) -> Result<Box<dyn Source>, DriverError> {
        let params = SignalParams::parse(&config.params)?;
        Ok(Box::new(SignalSource::new(
            &config.label,
            config.process_rate_hz,
            params,
        )))
    }
}

/// Simulated digitizer producing one [`Payload::Samples`] burst per tick.
///
/// [`Payload::Samples`]: crate::observation::Payload::Samples
pub struct SignalSource {
    label: String,
    rate_hz: f64,
    params: SignalParams,
    rng: ChaCha8Rng,
    sample_index: u64,
    acquisitions: u64,
}

impl SignalSource {
    /// Source at phase zero; `initialize` must run before `acquire`.
    pub fn new(label: &str, rate_hz: f64, params: SignalParams) -> Self {
        let rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            label: label.to_string(),
            rate_hz,
            params,
            rng,
            sample_index: 0,
            acquisitions: 0,
        }
    }

    fn sample_rate_hz(&self) -> f64 {
        self.params.samples_per_tick as f64 * self.rate_hz
    }
}

impl Source for SignalSource {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn initialize(&mut self) -> Result<(), DriverError> {
        self.params.faults.check_initialize(DRIVER_TYPE)?;
        self.sample_index = 0;
        Ok(())
    }

    fn acquire(&mut self) -> Result<Vec<Observation>, DriverError> {
        self.params
            .faults
            .check_acquire(DRIVER_TYPE, self.acquisitions)?;
        self.acquisitions += 1;

        let dt = 1.0 / self.sample_rate_hz();
        let mut values = Vec::with_capacity(self.params.samples_per_tick);
        for _ in 0..self.params.samples_per_tick {
            let t = self.sample_index as f64 * dt;
            let mut value = self.params.amplitude * (TAU * self.params.frequency_hz * t).sin();
            if self.params.noise > 0.0 {
                value += self.rng.gen_range(-self.params.noise..=self.params.noise);
            }
            values.push(value);
            self.sample_index += 1;
        }

        Ok(vec![Observation::new(
            Utc::now(),
            self.label.as_str(),
            Payload::Samples {
                values,
                unit: self.params.unit.clone(),
            },
        )])
    }

    fn process_rate_hz(&self) -> f64 {
        self.rate_hz
    }
}
