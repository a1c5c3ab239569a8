//! Per-source periodic worker.
//!
//! A [`SourceWorker`] owns one source for its whole life and runs on its own
//! OS thread:
//!
//! ```text
//!   resolve driver ──► check rate ──► initialize ──┐
//!         │               │               │        ▼
//!         └───────────────┴──── fail ─────┘   ┌─────────────────────────────┐
//!                         │                   │ while !signal.is_raised()   │
//!                         ▼                   │   t0 = now                  │
//!              raise signal, report           │   batch = source.acquire()  │
//!                                             │   store.merge_insert(batch) │
//!                                             │   sleep(period - elapsed)   │
//!                                             └─────────────────────────────┘
//! ```
//!
//! Any failure, including a panic inside the driver, raises the generation's
//! cancellation signal: one faulty source halts every worker. The cause is
//! kept in the worker's [`WorkerReport`] and live [`WorkerState`] so callers
//! can tell which source failed and why.

use crate::error::{DriverErrorKind, WorkerFailure};
use crate::signal::CancellationSignal;
use crate::source::{period_ms, validate_rate, Source, SourceConfig, SourceRegistry};
use crate::store::{InsertOutcome, ObservationStore};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Live state of a worker thread.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    /// Resolving and initializing the driver.
    Starting,
    /// Inside the acquisition loop.
    Running,
    /// Left the loop after observing the cancellation signal.
    Stopped,
    /// Stopped on its own after a fault.
    Failed(String),
}

impl WorkerState {
    /// Whether the worker has left its loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed(_))
    }
}

/// How a worker's thread ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Exited after observing the cancellation signal.
    Completed,
    /// Stopped on a fault and raised the signal.
    Failed(WorkerFailure),
    /// The driver panicked; carries the panic message.
    Panicked(String),
}

impl WorkerOutcome {
    /// Anything other than [`WorkerOutcome::Completed`].
    pub fn is_failure(&self) -> bool {
        !matches!(self, WorkerOutcome::Completed)
    }
}

/// Summary a worker returns when its thread exits.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    /// Source label.
    pub label: String,
    /// Driver type the source asked for.
    pub driver: String,
    /// How the thread ended.
    pub outcome: WorkerOutcome,
    /// Completed acquire calls.
    pub iterations: u64,
    /// Records the store accepted.
    pub records_accepted: u64,
    /// Records in batches the store rejected.
    pub records_dropped: u64,
    /// Batches the store rejected.
    pub batches_dropped: u64,
}

#[derive(Debug, Default)]
struct Progress {
    iterations: u64,
    records_accepted: u64,
    records_dropped: u64,
    batches_dropped: u64,
}

/// One periodic producer bound to one configured source.
pub struct SourceWorker {
    config: SourceConfig,
    store: Arc<ObservationStore>,
    signal: CancellationSignal,
    registry: Arc<SourceRegistry>,
    state: Arc<RwLock<WorkerState>>,
}

impl SourceWorker {
    /// Worker that has not started; nothing runs until `spawn` or `run`.
    pub fn new(
        config: SourceConfig,
        store: Arc<ObservationStore>,
        signal: CancellationSignal,
        registry: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            signal,
            registry,
            state: Arc::new(RwLock::new(WorkerState::Starting)),
        }
    }

    /// Run the worker on a new named thread.
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let label = self.config.label.clone();
        let driver = self.config.driver.clone();
        let state = Arc::clone(&self.state);
        let signal = self.signal.clone();

        let thread = thread::Builder::new()
            .name(format!("grabber-{label}"))
            .spawn(move || self.run())?;

        Ok(WorkerHandle {
            label,
            driver,
            state,
            signal,
            thread,
        })
    }

    /// Run the worker on the current thread until it is cancelled or fails.
    pub fn run(self) -> WorkerReport {
        let span = info_span!(
            "source_worker",
            label = %self.config.label,
            driver = %self.config.driver
        );
        let _entered = span.enter();

        let mut progress = Progress::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut progress)));

        let outcome = match result {
            Ok(Ok(())) => {
                *self.state.write() = WorkerState::Stopped;
                info!(
                    iterations = progress.iterations,
                    accepted = progress.records_accepted,
                    dropped = progress.records_dropped,
                    "Closing source worker"
                );
                WorkerOutcome::Completed
            }
            Ok(Err(failure)) => {
                error!(error = %failure, "Source worker failed; stopping all workers");
                *self.state.write() = WorkerState::Failed(failure.to_string());
                self.signal.raise();
                WorkerOutcome::Failed(failure)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Source worker panicked; stopping all workers");
                *self.state.write() = WorkerState::Failed(format!("panicked: {message}"));
                self.signal.raise();
                WorkerOutcome::Panicked(message)
            }
        };

        WorkerReport {
            label: self.config.label.clone(),
            driver: self.config.driver.clone(),
            outcome,
            iterations: progress.iterations,
            records_accepted: progress.records_accepted,
            records_dropped: progress.records_dropped,
            batches_dropped: progress.batches_dropped,
        }
    }

    fn execute(&self, progress: &mut Progress) -> Result<(), WorkerFailure> {
        let mut source = self.resolve_source()?;

        let rate_hz = source.process_rate_hz();
        validate_rate(rate_hz).map_err(WorkerFailure::Configuration)?;
        let period = Duration::from_millis(period_ms(rate_hz));

        info!(
            rate_hz,
            period_ms = period.as_millis() as u64,
            "Starting source worker"
        );

        source.initialize().map_err(WorkerFailure::Initialization)?;
        *self.state.write() = WorkerState::Running;

        while !self.signal.is_raised() {
            let started = Instant::now();

            let batch = source.acquire().map_err(WorkerFailure::Acquisition)?;
            progress.iterations += 1;

            if !batch.is_empty() {
                match self.store.merge_insert(batch) {
                    InsertOutcome::Accepted(count) => progress.records_accepted += count as u64,
                    InsertOutcome::Dropped(count) => {
                        progress.batches_dropped += 1;
                        progress.records_dropped += count as u64;
                        debug!(count, "Store full, batch dropped");
                    }
                }
            }

            let elapsed = started.elapsed();
            match period.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => {
                    self.signal.wait_timeout(remaining);
                }
                _ => {
                    if elapsed > period * 2 {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            period_ms = period.as_millis() as u64,
                            "Acquisition is slower than the configured rate"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve_source(&self) -> Result<Box<dyn Source>, WorkerFailure> {
        match self.registry.create(&self.config) {
            None => Err(WorkerFailure::UnrecognizedSource(self.config.driver.clone())),
            Some(Err(err)) if err.kind == DriverErrorKind::Configuration => {
                Err(WorkerFailure::Configuration(err.to_string()))
            }
            Some(Err(err)) => Err(WorkerFailure::Initialization(err)),
            Some(Ok(source)) => Ok(source),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to a spawned worker, owned by the lifecycle manager.
pub struct WorkerHandle {
    label: String,
    driver: String,
    state: Arc<RwLock<WorkerState>>,
    signal: CancellationSignal,
    thread: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    /// Source label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of the live state.
    pub fn state(&self) -> WorkerState {
        self.state.read().clone()
    }

    /// Signal shared with the worker's generation.
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Whether the thread has exited; `join` will not block.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the worker thread exits. No timeout: a driver stuck inside
    /// `acquire()` blocks this call until it returns.
    pub fn join(self) -> WorkerReport {
        match self.thread.join() {
            Ok(report) => report,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(label = %self.label, panic = %message, "Worker thread panicked");
                WorkerReport {
                    label: self.label,
                    driver: self.driver,
                    outcome: WorkerOutcome::Panicked(message),
                    iterations: 0,
                    records_accepted: 0,
                    records_dropped: 0,
                    batches_dropped: 0,
                }
            }
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("label", &self.label)
            .field("driver", &self.driver)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::observation::Observation;
    use crate::source::SourceFactory;

    /// Source reporting a fixed rate, used to reach the worker's own rate check.
    struct FixedRateSource(f64);

    impl Source for FixedRateSource {
        fn driver_type(&self) -> &str {
            "fixed_rate"
        }

        fn acquire(&mut self) -> Result<Vec<Observation>, DriverError> {
            Ok(Vec::new())
        }

        fn process_rate_hz(&self) -> f64 {
            self.0
        }
    }

    struct FixedRateFactory;

    impl SourceFactory for FixedRateFactory {
        fn driver_type(&self) -> &'static str {
            "fixed_rate"
        }

        fn name(&self) -> &'static str {
            "Fixed Rate"
        }

        fn validate(&self, _params: &toml::Value) -> Result<(), DriverError> {
            Ok(())
        }

        fn build(&self, config: &SourceConfig) -> Result<Box<dyn Source>, DriverError> {
            let rate = config
                .params
                .get("reported_rate_hz")
                .and_then(|v| v.as_float())
                .unwrap_or(config.process_rate_hz);
            Ok(Box::new(FixedRateSource(rate)))
        }
    }

    fn registry() -> Arc<SourceRegistry> {
        let registry = SourceRegistry::with_mock_drivers();
        registry.register_factory(Box::new(FixedRateFactory));
        Arc::new(registry)
    }

    fn worker(config: SourceConfig, store: &Arc<ObservationStore>) -> (SourceWorker, CancellationSignal) {
        let signal = CancellationSignal::new();
        let worker = SourceWorker::new(config, Arc::clone(store), signal.clone(), registry());
        (worker, signal)
    }

    #[test]
    fn unknown_driver_fails_fast_and_raises_signal() {
        let store = Arc::new(ObservationStore::new(10));
        let (worker, signal) = worker(SourceConfig::new("x", "laser_9000", 10.0), &store);

        let report = worker.run();
        assert_eq!(
            report.outcome,
            WorkerOutcome::Failed(WorkerFailure::UnrecognizedSource("laser_9000".into()))
        );
        assert_eq!(report.iterations, 0);
        assert!(signal.is_raised());
    }

    #[test]
    fn driver_reported_rate_must_be_positive() {
        let store = Arc::new(ObservationStore::new(10));
        let config =
            SourceConfig::new("x", "fixed_rate", 10.0).with_param("reported_rate_hz", 0.0);
        let (worker, signal) = worker(config, &store);

        let report = worker.run();
        assert!(matches!(
            report.outcome,
            WorkerOutcome::Failed(WorkerFailure::Configuration(_))
        ));
        assert!(signal.is_raised());
    }

    #[test]
    fn invalid_driver_params_are_a_configuration_failure() {
        let store = Arc::new(ObservationStore::new(10));
        let config =
            SourceConfig::new("x", "mock_counter", 10.0).with_param("records_per_tick", "lots");
        let (worker, _signal) = worker(config, &store);

        assert!(matches!(
            worker.run().outcome,
            WorkerOutcome::Failed(WorkerFailure::Configuration(_))
        ));
    }

    #[test]
    fn init_failure_is_reported() {
        let store = Arc::new(ObservationStore::new(10));
        let config = SourceConfig::new("x", "mock_counter", 10.0).with_param("fail_on_init", true);
        let (worker, signal) = worker(config, &store);

        assert!(matches!(
            worker.run().outcome,
            WorkerOutcome::Failed(WorkerFailure::Initialization(_))
        ));
        assert!(signal.is_raised());
    }

    #[test]
    fn acquisition_fault_raises_signal_after_inserting_earlier_batches() {
        let store = Arc::new(ObservationStore::new(10));
        let config = SourceConfig::new("x", "mock_counter", 200.0).with_param("fail_after", 3);
        let (worker, signal) = worker(config, &store);

        let report = worker.run();
        assert!(matches!(
            report.outcome,
            WorkerOutcome::Failed(WorkerFailure::Acquisition(_))
        ));
        assert_eq!(report.iterations, 3);
        assert_eq!(report.records_accepted, 3);
        assert_eq!(store.len(), 3);
        assert!(signal.is_raised());
    }

    #[test]
    fn panicking_driver_is_contained() {
        let store = Arc::new(ObservationStore::new(10));
        let config = SourceConfig::new("x", "mock_counter", 200.0).with_param("panic_after", 1);
        let (worker, signal) = worker(config, &store);
        let handle = worker.spawn().expect("spawn worker");

        let report = handle.join();
        match report.outcome {
            WorkerOutcome::Panicked(message) => assert!(message.contains("Injected panic")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.iterations, 1);
        assert!(signal.is_raised());
    }

    #[test]
    fn cancelled_worker_completes_and_stops_inserting() {
        let store = Arc::new(ObservationStore::new(1000));
        let (worker, signal) = worker(SourceConfig::new("x", "mock_counter", 100.0), &store);
        let handle = worker.spawn().expect("spawn worker");

        thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.state(), WorkerState::Running);
        signal.raise();

        let report = handle.join();
        assert_eq!(report.outcome, WorkerOutcome::Completed);
        assert!(report.iterations > 0);
        assert_eq!(report.records_accepted as usize, store.len());

        let after_join = store.len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(store.len(), after_join);
    }

    #[test]
    fn slow_rate_worker_wakes_on_signal() {
        let store = Arc::new(ObservationStore::new(10));
        // 0.1 Hz: a 10 s cadence sleep the signal must cut short.
        let (worker, signal) = worker(SourceConfig::new("x", "mock_counter", 0.1), &store);
        let handle = worker.spawn().expect("spawn worker");

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        signal.raise();
        let report = handle.join();

        assert_eq!(report.outcome, WorkerOutcome::Completed);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cadence_tracks_configured_rate() {
        let store = Arc::new(ObservationStore::new(1000));
        // 20 Hz over 500 ms is about ten acquisitions.
        let (worker, signal) = worker(SourceConfig::new("x", "mock_counter", 20.0), &store);
        let handle = worker.spawn().expect("spawn worker");

        thread::sleep(Duration::from_millis(500));
        signal.raise();
        let report = handle.join();

        assert_eq!(report.outcome, WorkerOutcome::Completed);
        assert!(
            (7..=13).contains(&report.iterations),
            "{} iterations at 20 Hz in 500 ms",
            report.iterations
        );
    }

    #[test]
    fn full_store_counts_dropped_batches() {
        let store = Arc::new(ObservationStore::new(1));
        let config =
            SourceConfig::new("x", "mock_counter", 500.0).with_param("records_per_tick", 2);
        let (worker, signal) = worker(config, &store);
        let handle = worker.spawn().expect("spawn worker");

        thread::sleep(Duration::from_millis(60));
        signal.raise();
        let report = handle.join();

        assert_eq!(report.records_accepted, 2);
        assert!(report.batches_dropped > 0);
        assert_eq!(report.records_dropped, report.batches_dropped * 2);
        assert_eq!(store.len(), 2);
    }
}
