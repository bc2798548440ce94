//! Host-to-tenant resolution with a process-wide TTL cache.

mod cache;
mod caching;

pub use cache::TenantCache;
pub use caching::CachingTenantResolver;

use crate::directory::DirectoryError;

/// Why a host could not be resolved to a tenant.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No active tenant owns the host. Carries the host as received.
    #[error("Tenant not found for host: {host}")]
    NotFound { host: String },
    /// The directory failed or did not answer in time. Transient.
    #[error("tenant directory unavailable")]
    DirectoryUnavailable(#[source] DirectoryError),
}
