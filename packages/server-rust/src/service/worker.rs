//! Background worker for periodic tasks.
//!
//! `BackgroundWorker<R>` ticks a `BackgroundRunnable` at a fixed interval
//! until stopped. [`CacheSweeper`] is the runnable that keeps the tenant
//! cache free of expired entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::resolver::TenantCache;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Periodic job driven by [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// Called on each tick interval.
    async fn on_tick(&mut self);

    /// Called once when the worker stops. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// CacheSweeper
// ---------------------------------------------------------------------------

/// Purges expired tenant-cache entries on every tick.
pub struct CacheSweeper {
    cache: Arc<TenantCache>,
}

impl CacheSweeper {
    #[must_use]
    pub fn new(cache: Arc<TenantCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl BackgroundRunnable for CacheSweeper {
    async fn on_tick(&mut self) {
        let removed = self.cache.purge_expired();
        if removed > 0 {
            debug!(removed, remaining = self.cache.len(), "purged expired tenant cache entries");
        }
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Spawned tokio task that ticks a [`BackgroundRunnable`] at a fixed
/// interval until stopped.
pub struct BackgroundWorker {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn start<R: BackgroundRunnable>(mut runnable: R, tick_interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stops the worker and waits for its task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
