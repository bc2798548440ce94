use std::sync::Arc;

use async_trait::async_trait;
use tenantry_core::{ConnectionDescriptor, NewTenant, NewToken, Tenant, TenantId, TenantUpdate, Token};

use crate::datacontext::{ConnectionError, DataContext, DataContextError};
use crate::directory::DirectoryError;
use crate::resolver::ResolveError;

/// Control-plane catalog of tenant records.
/// Implementations: `PostgreSQL` (`PgDirectory`), memory (`MemoryDirectory`).
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find the tenant whose routing domain equals `domain`, compared
    /// case-insensitively. Inactive tenants are returned as well; callers
    /// decide what inactivity means for them.
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>, DirectoryError>;

    /// Load a tenant by id.
    async fn get(&self, id: TenantId) -> Result<Option<Tenant>, DirectoryError>;

    /// List tenants ordered by id.
    async fn list(&self, include_inactive: bool) -> Result<Vec<Tenant>, DirectoryError>;

    /// Insert a new tenant. Fails with `Conflict` if the domain is taken.
    async fn create(&self, tenant: NewTenant) -> Result<Tenant, DirectoryError>;

    /// Apply a partial update and return the stored result.
    async fn update(&self, id: TenantId, update: &TenantUpdate) -> Result<Tenant, DirectoryError>;
}

/// Maps an inbound host name to its tenant.
///
/// The production implementation is [`CachingTenantResolver`](crate::resolver::CachingTenantResolver).
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Resolve `host` (matched case-insensitively) to an active tenant.
    async fn resolve(&self, host: &str) -> Result<Arc<Tenant>, ResolveError>;

    /// Drop any cached resolution for `host`. Idempotent.
    fn invalidate(&self, host: &str);
}

/// Opens request-scoped handles onto tenant data stores.
#[async_trait]
pub trait DataContextFactory: Send + Sync {
    /// Connect to the store named by `descriptor` and verify it is reachable.
    ///
    /// Every returned handle must be released exactly once by its owner.
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<DataContext, ConnectionError>;

    /// Drop any resources held for `descriptor` once no tenant uses it.
    ///
    /// Handles already open keep working until released. Default is a no-op.
    fn retire(&self, _descriptor: &ConnectionDescriptor) {}
}

/// Backend session for one tenant store, wrapped by [`DataContext`].
///
/// Implementations assume a single logical owner and are never called after
/// `release` has been invoked.
#[async_trait]
pub trait TenantConnection: Send + Sync {
    async fn list_tokens(&self) -> Result<Vec<Token>, DataContextError>;

    async fn get_token(&self, id: i64) -> Result<Option<Token>, DataContextError>;

    /// Insert a token. Fails with `Conflict` if this store already holds
    /// a token with the same content hash.
    async fn insert_token(&self, token: NewToken) -> Result<Token, DataContextError>;

    /// Returns `true` if a token was removed.
    async fn delete_token(&self, id: i64) -> Result<bool, DataContextError>;

    /// Return the session to its pool or close it.
    async fn release(&self) -> anyhow::Result<()>;
}
