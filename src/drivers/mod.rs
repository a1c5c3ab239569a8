//! Bundled simulated sources.
//!
//! - [`CounterSource`] (`mock_counter`): N scalar readings per tick with a
//!   monotonically increasing value.
//! - [`SignalSource`] (`mock_signal`): bursts of a noisy sine wave.
//!
//! Both accept the [`FaultConfig`] keys in their `params` table.

pub mod fault;
mod mock_counter;
mod mock_signal;

pub use fault::FaultConfig;
pub use mock_counter::{CounterFactory, CounterParams, CounterSource};
pub use mock_signal::{SignalFactory, SignalParams, SignalSource};

use crate::source::SourceRegistry;

/// Register every bundled driver factory.
pub fn register_all(registry: &SourceRegistry) {
    registry.register_factory(Box::new(CounterFactory));
    registry.register_factory(Box::new(SignalFactory));
}
