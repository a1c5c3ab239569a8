//! Error types for the grabber.
//!
//! Errors are split by where they surface:
//!
//! - **`DriverError`**: raised by a source driver while building, initializing,
//!   or acquiring. Never crosses a worker thread boundary synchronously; the
//!   worker folds it into its [`WorkerFailure`] and raises the cancellation
//!   signal.
//! - **`WorkerFailure`**: the terminal reason a worker stopped on its own.
//!   Reported through the worker's live state and its `WorkerReport`.
//! - **`StartError`**: configuration-time problems detected by
//!   `AcquisitionManager::start`. The only lifecycle errors returned directly
//!   to the caller.
//! - **`GrabberError`**: application-level errors (configuration loading,
//!   persistence, snapshots) used by the CLI and the helper modules.
//!
//! Capacity overflow in the observation store is deliberately *not* an error:
//! it is the `InsertOutcome::Dropped` policy outcome.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Where in a driver's life an error arose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device setup failed.
    Initialization,
    /// Parameters were rejected.
    Configuration,
    /// A read failed.
    Acquisition,
    /// The device reported a fault.
    Hardware,
    /// Anything else.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Acquisition => "acquisition",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a source driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Registry key of the failing driver.
    pub driver_type: String,
    /// Category of failure.
    pub kind: DriverErrorKind,
    /// Driver-supplied detail.
    pub message: String,
}

impl DriverError {
    /// Error of any kind.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a configuration problem in a driver's parameter set.
    pub fn configuration(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::Configuration, message)
    }

    /// Shorthand for a fault raised while acquiring.
    pub fn acquisition(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::Acquisition, message)
    }
}

// =============================================================================
// Worker Failures
// =============================================================================

/// Terminal reason a source worker stopped before being asked to.
///
/// Every variant is fatal for the whole acquisition generation: the worker
/// that records it also raises the shared cancellation signal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerFailure {
    /// Invalid or missing required parameter (e.g. a process rate <= 0).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The configured driver identifier is not registered.
    #[error("unrecognized source driver '{0}'")]
    UnrecognizedSource(String),

    /// The driver could not be built or initialized.
    #[error("initialization failed: {0}")]
    Initialization(DriverError),

    /// The driver failed inside `acquire()`.
    #[error("acquisition fault: {0}")]
    Acquisition(DriverError),
}

// =============================================================================
// Start Errors
// =============================================================================

/// A source entry `start` refused to spawn a worker for.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSource {
    /// Entry label.
    pub label: String,
    /// Why no worker was spawned.
    pub reason: String,
}

impl std::fmt::Display for RejectedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}': {}", self.label, self.reason)
    }
}

/// Why `start` did not bring up a complete generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StartError {
    /// A generation is already active. `cancelled` reports whether its
    /// cancellation signal has been raised, i.e. it was never cleanly stopped.
    #[error("acquisition is already running (cancellation raised: {cancelled})")]
    AlreadyRunning {
        /// Signal state of the running generation.
        cancelled: bool,
    },

    /// The list was empty or held only ignorable entries.
    #[error("no sources configured")]
    NoSources,

    /// Some entries were rejected. Workers for the `spawned` entries are
    /// running and the generation must still be stopped.
    #[error("configuration error in {} source(s): {}", rejected.len(), format_rejected(rejected))]
    InvalidSources {
        /// Labels that got a worker.
        spawned: Vec<String>,
        /// Entries that did not.
        rejected: Vec<RejectedSource>,
    },
}

impl StartError {
    /// Whether any worker is running despite the error.
    pub fn has_running_workers(&self) -> bool {
        matches!(self, StartError::InvalidSources { spawned, .. } if !spawned.is_empty())
    }
}

fn format_rejected(rejected: &[RejectedSource]) -> String {
    rejected
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Application Errors
// =============================================================================

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, GrabberError>;

/// Top-level error for configuration, persistence and lifecycle calls.
#[derive(Error, Debug)]
pub enum GrabberError {
    /// Configuration file could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Raw I/O failure outside whole-file persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Whole-file persistence failed. The underlying cause (missing file,
    /// permission, short read) is folded into `message`.
    #[error("Storage error for '{}': {message}", path.display())]
    Storage {
        /// File that failed.
        path: PathBuf,
        /// Cause.
        message: String,
    },

    /// Snapshot bytes were not a valid encoding.
    #[error("Snapshot encoding error: {0}")]
    Snapshot(String),

    /// Acquisition could not start.
    #[error(transparent)]
    Start(#[from] StartError),
}

impl From<figment::Error> for GrabberError {
    fn from(value: figment::Error) -> Self {
        GrabberError::Config(Box::new(value))
    }
}
