//! Request-scoped data-access handles onto tenant stores.
//!
//! A [`DataContext`] is opened by a [`DataContextFactory`](crate::traits::DataContextFactory)
//! for exactly one request and released when that request ends. The handle
//! wraps a backend [`TenantConnection`] and guarantees the backend sees at
//! most one `release` call no matter how many exit paths race to release it.
//!
//! Open handles are counted in a process-wide [`HandleLedger`], which the
//! health endpoints report and shutdown drains.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryDataContextFactory, MemoryTenantStore};
#[cfg(feature = "postgres")]
pub(crate) use postgres::is_unique_violation;
#[cfg(feature = "postgres")]
pub use postgres::{pg_connect_options, PgDataContextFactory};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tenantry_core::{ConnectionDescriptor, DescriptorError, NewToken, Token};
use tracing::warn;

use crate::traits::TenantConnection;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one data-context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dc-{}", self.0)
    }
}

/// Counts data-context handles that have been opened but not yet released.
///
/// Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct HandleLedger {
    open: Arc<AtomicU64>,
}

impl HandleLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.open.load(Ordering::SeqCst)
    }

    /// Waits until every handle has been released, up to `timeout`.
    ///
    /// Returns `true` if the ledger reached zero.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.open_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn opened(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Failure to open a data context. Carries only the masked descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("tenant store unreachable ({descriptor}): {reason}")]
    Unreachable { descriptor: String, reason: String },
    #[error("tenant store probe timed out after {timeout_ms}ms ({descriptor})")]
    Timeout { descriptor: String, timeout_ms: u64 },
    #[error("invalid connection descriptor ({descriptor}): {source}")]
    InvalidDescriptor {
        descriptor: String,
        #[source]
        source: DescriptorError,
    },
    #[error("unsupported descriptor scheme `{scheme}` ({descriptor})")]
    Unsupported { descriptor: String, scheme: String },
}

impl ConnectionError {
    pub(crate) fn unreachable(descriptor: &ConnectionDescriptor, reason: impl fmt::Display) -> Self {
        Self::Unreachable {
            descriptor: descriptor.masked(),
            reason: scrub(descriptor, &reason.to_string()),
        }
    }

    pub(crate) fn timeout(descriptor: &ConnectionDescriptor, timeout: Duration) -> Self {
        Self::Timeout {
            descriptor: descriptor.masked(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub(crate) fn invalid(descriptor: &ConnectionDescriptor, source: DescriptorError) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.masked(),
            source,
        }
    }

    /// Masked descriptor this error refers to.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        match self {
            Self::Unreachable { descriptor, .. }
            | Self::Timeout { descriptor, .. }
            | Self::InvalidDescriptor { descriptor, .. }
            | Self::Unsupported { descriptor, .. } => descriptor,
        }
    }
}

/// Removes the raw descriptor from driver-provided error text.
fn scrub(descriptor: &ConnectionDescriptor, reason: &str) -> String {
    let raw = descriptor.expose();
    if raw.is_empty() {
        reason.to_string()
    } else {
        reason.replace(raw, &descriptor.masked())
    }
}

/// Errors from operations on an open [`DataContext`].
#[derive(Debug, thiserror::Error)]
pub enum DataContextError {
    #[error("data context already released")]
    Released,
    #[error("token with hash {hash} already exists")]
    Conflict { hash: String },
    #[error("tenant store error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// The backend failed while releasing a handle. Logged, never surfaced to clients.
#[derive(Debug, thiserror::Error)]
#[error("failed to release data context {handle}: {source}")]
pub struct ReleaseError {
    pub handle: HandleId,
    #[source]
    pub source: anyhow::Error,
}

/// Request-scoped handle onto one tenant's data store.
pub struct DataContext {
    id: HandleId,
    conn: Box<dyn TenantConnection>,
    released: AtomicBool,
    ledger: HandleLedger,
}

impl DataContext {
    /// Wraps an already probed backend session and records it as open.
    #[must_use]
    pub fn new(conn: Box<dyn TenantConnection>, ledger: &HandleLedger) -> Self {
        ledger.opened();
        Self {
            id: HandleId::next(),
            conn,
            released: AtomicBool::new(false),
            ledger: ledger.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), DataContextError> {
        if self.is_released() {
            Err(DataContextError::Released)
        } else {
            Ok(())
        }
    }

    pub async fn list_tokens(&self) -> Result<Vec<Token>, DataContextError> {
        self.ensure_open()?;
        self.conn.list_tokens().await
    }

    pub async fn get_token(&self, id: i64) -> Result<Option<Token>, DataContextError> {
        self.ensure_open()?;
        self.conn.get_token(id).await
    }

    pub async fn insert_token(&self, token: NewToken) -> Result<Token, DataContextError> {
        self.ensure_open()?;
        self.conn.insert_token(token).await
    }

    pub async fn delete_token(&self, id: i64) -> Result<bool, DataContextError> {
        self.ensure_open()?;
        self.conn.delete_token(id).await
    }

    /// Releases the handle. Only the first call reaches the backend; later
    /// calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] if the backend failed to release its session.
    /// The handle counts as released either way.
    pub async fn release(&self) -> Result<(), ReleaseError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.ledger.closed();
        self.conn.release().await.map_err(|source| ReleaseError {
            handle: self.id,
            source,
        })
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContext")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl Drop for DataContext {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.ledger.closed();
            warn!(handle = %self.id, "data context dropped without release");
        }
    }
}
