//! Importer lifecycle state machine and stop signal
//!
//! ```text
//! Idle ──begin_run──▶ Running ──request_stop──▶ StopRequested ──finish──▶ Stopped
//!   │                    │                                                  ▲
//!   │                    └──────────────── finish (accept returned) ────────┤
//!   └──request_stop──▶ StopRequested ──begin_run (refused)──────────────────┘
//! ```
//!
//! Transitions only move forward. A resource that has to be imported again
//! after `Stopped` gets a fresh lifecycle.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Phase of one importer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImporterPhase {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

impl fmt::Display for ImporterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop-requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Idempotent, level-triggered stop request.
///
/// Once triggered it stays triggered, so a waiter that subscribes after the
/// stop still sees it. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request stop. Returns `true` for the first call only.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once stop has been requested; immediately if it already was.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Phase tracking for one importer instance
#[derive(Debug)]
pub struct ImporterLifecycle {
    phase: watch::Sender<ImporterPhase>,
    stop: StopSignal,
}

impl Default for ImporterLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ImporterLifecycle {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ImporterPhase::Idle);
        Self {
            phase,
            stop: StopSignal::new(),
        }
    }

    pub fn phase(&self) -> ImporterPhase {
        *self.phase.borrow()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Enter `Running`. Refused (and the instance goes straight to `Stopped`)
    /// if stop was requested first or the instance already ran.
    pub fn begin_run(&self) -> bool {
        let mut started = false;
        self.phase.send_modify(|phase| match *phase {
            ImporterPhase::Idle => {
                *phase = ImporterPhase::Running;
                started = true;
            }
            ImporterPhase::StopRequested => *phase = ImporterPhase::Stopped,
            ImporterPhase::Running | ImporterPhase::Stopped => {}
        });
        started
    }

    /// Record a stop request and wake any waiter. Safe to call in any phase,
    /// any number of times.
    pub fn request_stop(&self) {
        self.stop.trigger();
        self.phase.send_modify(|phase| {
            if matches!(*phase, ImporterPhase::Idle | ImporterPhase::Running) {
                *phase = ImporterPhase::StopRequested;
            }
        });
    }

    /// The run body has returned
    pub fn finish(&self) {
        self.phase.send_replace(ImporterPhase::Stopped);
    }

    /// Resolves once the phase reaches `Stopped`
    pub async fn wait_stopped(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|p| *p == ImporterPhase::Stopped).await;
    }
}
