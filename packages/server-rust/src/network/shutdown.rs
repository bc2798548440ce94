//! Server lifecycle: health state transitions and draining of open tenant
//! data contexts on shutdown.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::datacontext::HandleLedger;

/// Server health state.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Initializing, not yet accepting requests.
    Starting,
    Ready,
    /// Shutdown requested; waiting for open data contexts to be released.
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Owns the health state and coordinates graceful shutdown.
///
/// Health probes read [`Lifecycle::health_state`]. [`Lifecycle::wait_for_drain`]
/// holds shutdown until every tenant data context in the ledger is released.
#[derive(Debug)]
pub struct Lifecycle {
    ledger: HandleLedger,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl Lifecycle {
    /// Creates a lifecycle in the `Starting` state tracking `ledger`.
    #[must_use]
    pub fn new(ledger: HandleLedger) -> Self {
        Self {
            ledger,
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining`. Readiness fails from here on.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Ledger of open tenant data contexts.
    #[must_use]
    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    /// Waits for all open data contexts to be released, up to `timeout`.
    ///
    /// Returns `true` (and moves to `Stopped`) if the ledger drained. On
    /// timeout the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        if self.ledger.wait_for_drain(timeout).await {
            self.health_state.store(Arc::new(HealthState::Stopped));
            true
        } else {
            false
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(HandleLedger::new())
    }
}
