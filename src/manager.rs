//! Acquisition lifecycle: `Idle → Running → Idle`.
//!
//! A *generation* is one Start→Stop cycle. It owns a fresh
//! [`CancellationSignal`] and one [`WorkerHandle`] per spawned source. The
//! [`ObservationStore`] is created with the manager and outlives every
//! generation, so records not drained before a stop are still there when the
//! next generation starts.
//!
//! # Example
//!
//! ```no_run
//! use daq_grabber::manager::{AcquisitionManager, ManagerSettings};
//! use daq_grabber::source::{SourceConfig, SourceRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let manager = AcquisitionManager::new(
//!     ManagerSettings::default(),
//!     Arc::new(SourceRegistry::with_mock_drivers()),
//! );
//! manager
//!     .start(vec![SourceConfig::new("counter", "mock_counter", 10.0)], Duration::ZERO)
//!     .expect("start");
//! std::thread::sleep(Duration::from_millis(500));
//! let batch = manager.drain();
//! println!("drained {} records, {} left", batch.len(), batch.remaining);
//! let report = manager.stop(Duration::from_millis(300));
//! assert!(report.is_clean());
//! ```

use crate::error::{RejectedSource, StartError};
use crate::gateway::DrainedBatch;
use crate::signal::CancellationSignal;
use crate::source::{SourceConfig, SourceRegistry};
use crate::store::{DrainPolicy, ObservationStore, DEFAULT_MAX_OBSERVATIONS};
use crate::worker::{SourceWorker, WorkerHandle, WorkerReport, WorkerState};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause between consecutive worker spawns.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(300);

/// Pause between raising the signal and joining workers.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(300);

/// Store sizing and drain behaviour for a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Expected records per drain; the store holds twice this.
    pub max_observations: usize,
    /// Share of the store each drain removes.
    pub drain_policy: DrainPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_observations: DEFAULT_MAX_OBSERVATIONS,
            drain_policy: DrainPolicy::default(),
        }
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct StartSummary {
    /// Number of the generation just started.
    pub generation: u64,
    /// Labels that got a worker, in spawn order.
    pub spawned: Vec<String>,
    /// Labels of ignorable entries (`ignore = true`, empty, `global`).
    pub skipped: Vec<String>,
}

/// What `stop` observed while tearing a generation down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    /// `None` when `stop` was called while idle.
    pub generation: Option<u64>,
    /// The signal was already raised by a worker before `stop` was called.
    pub cancelled_by_worker: bool,
    /// One report per joined worker, in spawn order.
    pub workers: Vec<WorkerReport>,
    /// Time from entering `stop` to the last join.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when no worker failed or panicked.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Reports of workers that failed or panicked.
    pub fn failures(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|r| r.outcome.is_failure())
    }

    /// Report for `label`, if it had a worker.
    pub fn worker(&self, label: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|r| r.label == label)
    }
}

struct Generation {
    id: u64,
    signal: CancellationSignal,
    workers: Vec<WorkerHandle>,
}

/// Owns the shared store and at most one active generation of workers.
pub struct AcquisitionManager {
    registry: Arc<SourceRegistry>,
    store: Arc<ObservationStore>,
    active: Mutex<Option<Generation>>,
    generations: Mutex<u64>,
}

impl AcquisitionManager {
    /// Idle manager with an empty store.
    pub fn new(settings: ManagerSettings, registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            store: Arc::new(ObservationStore::with_policy(
                settings.max_observations,
                settings.drain_policy,
            )),
            active: Mutex::new(None),
            generations: Mutex::new(0),
        }
    }

    /// Spawn one worker per valid, non-ignorable entry, waiting `stagger`
    /// between spawns.
    ///
    /// Invalid entries are reported in [`StartError::InvalidSources`]; the
    /// valid ones still run in that case and the caller must `stop`.
    pub fn start(
        &self,
        configs: Vec<SourceConfig>,
        stagger: Duration,
    ) -> Result<StartSummary, StartError> {
        let mut active = self.active.lock();
        if let Some(generation) = active.as_ref() {
            return Err(StartError::AlreadyRunning {
                cancelled: generation.signal.is_raised(),
            });
        }
        if configs.is_empty() {
            return Err(StartError::NoSources);
        }

        let mut skipped = Vec::new();
        let mut rejected = Vec::new();
        let mut valid = Vec::new();
        let mut seen = HashSet::new();

        for config in configs {
            if config.is_ignorable() {
                debug!(label = %config.label, "Skipping ignorable source entry");
                skipped.push(config.label);
                continue;
            }
            if let Err(reason) = config.validate() {
                warn!(label = %config.label, %reason, "Rejecting source entry");
                rejected.push(RejectedSource {
                    label: config.label,
                    reason,
                });
                continue;
            }
            // Only a runnable entry claims its label.
            if !seen.insert(config.label.clone()) {
                warn!(label = %config.label, "Duplicate source label");
                rejected.push(RejectedSource {
                    label: config.label,
                    reason: "duplicate label".to_string(),
                });
                continue;
            }
            valid.push(config);
        }

        if valid.is_empty() {
            return Err(if rejected.is_empty() {
                StartError::NoSources
            } else {
                StartError::InvalidSources {
                    spawned: Vec::new(),
                    rejected,
                }
            });
        }

        let id = {
            let mut generations = self.generations.lock();
            *generations += 1;
            *generations
        };
        let signal = CancellationSignal::new();
        info!(generation = id, sources = valid.len(), "Starting acquisition");

        let total = valid.len();
        let mut workers = Vec::with_capacity(total);
        for (index, config) in valid.into_iter().enumerate() {
            let label = config.label.clone();
            let worker = SourceWorker::new(
                config,
                Arc::clone(&self.store),
                signal.clone(),
                Arc::clone(&self.registry),
            );
            match worker.spawn() {
                Ok(handle) => {
                    debug!(%label, "Spawned worker");
                    workers.push(handle);
                }
                Err(err) => {
                    error!(%label, error = %err, "Failed to spawn worker thread");
                    rejected.push(RejectedSource {
                        label,
                        reason: format!("thread spawn failed: {err}"),
                    });
                    continue;
                }
            }
            if index + 1 < total && !stagger.is_zero() {
                thread::sleep(stagger);
            }
        }

        if workers.is_empty() {
            return Err(StartError::InvalidSources {
                spawned: Vec::new(),
                rejected,
            });
        }

        let spawned: Vec<String> = workers.iter().map(|w| w.label().to_string()).collect();
        *active = Some(Generation {
            id,
            signal,
            workers,
        });

        if rejected.is_empty() {
            Ok(StartSummary {
                generation: id,
                spawned,
                skipped,
            })
        } else {
            Err(StartError::InvalidSources { spawned, rejected })
        }
    }

    /// Raise the signal, wait `grace`, then join every worker.
    ///
    /// Joins have no timeout. A no-op when idle.
    pub fn stop(&self, grace: Duration) -> ShutdownReport {
        let mut active = self.active.lock();
        let Some(generation) = active.take() else {
            debug!("Stop requested while idle");
            return ShutdownReport::default();
        };

        let started = Instant::now();
        let cancelled_by_worker = generation.signal.is_raised();
        if cancelled_by_worker {
            warn!(
                generation = generation.id,
                "Cancellation was already raised by a worker fault"
            );
        }

        generation.signal.raise();
        if !grace.is_zero() {
            thread::sleep(grace);
        }

        info!(
            generation = generation.id,
            workers = generation.workers.len(),
            "Waiting for all workers to close"
        );
        let workers: Vec<WorkerReport> = generation
            .workers
            .into_iter()
            .map(WorkerHandle::join)
            .collect();

        let report = ShutdownReport {
            generation: Some(generation.id),
            cancelled_by_worker,
            workers,
            elapsed: started.elapsed(),
        };
        info!(
            generation = generation.id,
            failures = report.failures().count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Acquisition stopped"
        );
        report
    }

    /// Remove the oldest share of stored records per the drain policy.
    pub fn drain(&self) -> DrainedBatch {
        DrainedBatch::from_store(&self.store)
    }

    /// Whether a generation is active, even one a worker has cancelled.
    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Whether the active generation's signal has been raised. Workers raise
    /// it on any fatal fault; callers poll this and then `stop`.
    pub fn cancellation_requested(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|g| g.signal.is_raised())
    }

    /// Current generation number, if running.
    pub fn generation(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|g| g.id)
    }

    /// Label and live state of each worker in the active generation.
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.active
            .lock()
            .as_ref()
            .map(|g| {
                g.workers
                    .iter()
                    .map(|w| (w.label().to_string(), w.state()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The shared store, which outlives generations.
    pub fn store(&self) -> &Arc<ObservationStore> {
        &self.store
    }

    /// Driver registry workers resolve against.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }
}

impl Drop for AcquisitionManager {
    fn drop(&mut self) {
        if self.active.get_mut().is_some() {
            warn!("Manager dropped while running, stopping workers");
            self.stop(DEFAULT_GRACE_PERIOD);
        }
    }
}

impl std::fmt::Debug for AcquisitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionManager")
            .field("store", &self.store)
            .field("generation", &self.generation())
            .finish()
    }
}
