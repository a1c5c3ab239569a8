//! Cooperative cancellation shared by one acquisition generation.
//!
//! Workers poll [`CancellationSignal::is_raised`] once per loop iteration.
//! Cancellation is not preemptive: a worker blocked inside a driver call only
//! notices the signal after that call returns. The signal does wake workers
//! that are sleeping out their cadence via [`CancellationSignal::wait_timeout`].

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Shared {
    raised: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Set-once stop indicator, cheap to clone.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    shared: Arc<Shared>,
}

impl CancellationSignal {
    /// Lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns `true` if this call raised it, `false` if it
    /// was already raised.
    pub fn raise(&self) -> bool {
        let first = !self.shared.raised.swap(true, Ordering::SeqCst);
        if first {
            let _guard = self.shared.lock.lock();
            self.shared.wake.notify_all();
        }
        first
    }

    /// Whether any clone has raised the signal.
    pub fn is_raised(&self) -> bool {
        self.shared.raised.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early if the signal is raised.
    ///
    /// Returns `true` if the signal is raised on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.lock.lock();
        while !self.is_raised() {
            if self.shared.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_raised()
    }
}

impl std::fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("raised", &self.is_raised())
            .finish()
    }
}
