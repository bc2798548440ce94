//! Tenant directory backends and seeding.
//!
//! The directory is the shared control-plane store holding every tenant
//! record. [`MemoryDirectory`] serves development and tests; `PgDirectory`
//! (feature `postgres`) is the durable backend.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
pub mod seed;

pub use memory::MemoryDirectory;
#[cfg(feature = "postgres")]
pub use postgres::PgDirectory;

use tenantry_core::{TenantId, TenantValidationError};

/// Errors returned by [`TenantDirectory`](crate::traits::TenantDirectory) implementations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The control-plane store could not be reached. Transient.
    #[error("tenant directory unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
    /// The lookup did not finish within the configured bound.
    #[error("tenant directory lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// Another tenant already owns the domain.
    #[error("domain already assigned to another tenant: {domain}")]
    Conflict { domain: String },
    #[error("tenant {id} not found")]
    NotFound { id: TenantId },
    #[error(transparent)]
    Invalid(#[from] TenantValidationError),
    #[error("tenant directory error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl DirectoryError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}
