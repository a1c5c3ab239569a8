//! # DAQ Grabber
//!
//! A polling data-acquisition core. One OS thread per configured source
//! polls its driver at a fixed rate and merges the results into a single
//! bounded, timestamp-ordered [`store::ObservationStore`]. The caller drains
//! the oldest records in batches while acquisition keeps running.
//!
//! ## Crate Structure
//!
//! - **`observation`**: the timestamped record and its payload.
//! - **`store`**: the shared bounded store with merge-insert and partial drain.
//! - **`signal`**: the per-generation cancellation signal.
//! - **`source`**: the `Source`/`SourceFactory` driver seam and its registry.
//! - **`drivers`**: bundled simulated drivers with fault injection.
//! - **`worker`**: the per-source polling loop and its thread handle.
//! - **`manager`**: start/stop lifecycle across all workers.
//! - **`gateway`**: drained batches and host conversion.
//! - **`config`**: figment-based TOML + environment configuration.
//! - **`persistence`**: whole-file load/save and observation snapshots.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: error taxonomy.

pub mod config;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod manager;
pub mod observation;
pub mod persistence;
pub mod signal;
pub mod source;
pub mod store;
pub mod worker;

pub use error::{AppResult, GrabberError, StartError};
pub use gateway::{DrainedBatch, HostConverter, JsonConverter};
pub use manager::{AcquisitionManager, ManagerSettings, ShutdownReport, StartSummary};
pub use observation::{Observation, Payload};
pub use source::{Source, SourceConfig, SourceFactory, SourceRegistry};
pub use store::{DrainPolicy, InsertOutcome, ObservationStore};
