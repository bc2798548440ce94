//! Production [`TenantResolver`]: cache first, then the directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tenantry_core::{normalize_host, Tenant};
use tracing::{debug, info, warn};

use super::{ResolveError, TenantCache};
use crate::directory::DirectoryError;
use crate::traits::{TenantDirectory, TenantResolver};

/// Resolves hosts through a [`TenantCache`], falling back to a
/// [`TenantDirectory`] lookup bounded by `lookup_timeout`.
///
/// Only successful resolutions are cached. A miss is answered by the
/// directory every time, so a tenant created after a failed lookup resolves
/// on the next request. Concurrent misses for the same host each query the
/// directory; the last insert wins with equivalent data. A lookup that
/// overlaps an invalidation answers its own request but is not cached.
pub struct CachingTenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: Arc<TenantCache>,
    lookup_timeout: Duration,
}

impl CachingTenantResolver {
    #[must_use]
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        cache: Arc<TenantCache>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            cache,
            lookup_timeout,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.cache
    }

    async fn lookup(&self, key: &str) -> Result<Option<Tenant>, DirectoryError> {
        match tokio::time::timeout(self.lookup_timeout, self.directory.find_by_domain(key)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DirectoryError::Timeout {
                timeout_ms: u64::try_from(self.lookup_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl TenantResolver for CachingTenantResolver {
    async fn resolve(&self, host: &str) -> Result<Arc<Tenant>, ResolveError> {
        let Some(key) = normalize_host(host) else {
            metrics::counter!("tenantry_resolver_not_found_total").increment(1);
            warn!(host, "empty host name");
            return Err(ResolveError::NotFound {
                host: host.to_string(),
            });
        };

        if let Some(tenant) = self.cache.get(&key) {
            metrics::counter!("tenantry_resolver_cache_hits_total").increment(1);
            info!(host = %key, tenant = %tenant.name, "tenant resolved from cache");
            return Ok(tenant);
        }
        metrics::counter!("tenantry_resolver_cache_misses_total").increment(1);
        debug!(host = %key, "tenant cache miss");

        let generation = self.cache.generation();
        match self.lookup(&key).await {
            Ok(Some(tenant)) if tenant.active => {
                let tenant = Arc::new(tenant);
                if !self
                    .cache
                    .insert_if_current(key.clone(), Arc::clone(&tenant), generation)
                {
                    debug!(host = %key, "cache invalidated during lookup, result not cached");
                }
                info!(host = %key, tenant = %tenant.name, "tenant resolved from directory");
                Ok(tenant)
            }
            Ok(Some(tenant)) => {
                metrics::counter!("tenantry_resolver_not_found_total").increment(1);
                warn!(host = %key, tenant = %tenant.name, "tenant is inactive");
                Err(ResolveError::NotFound {
                    host: host.to_string(),
                })
            }
            Ok(None) => {
                metrics::counter!("tenantry_resolver_not_found_total").increment(1);
                warn!(host = %key, "no tenant for host");
                Err(ResolveError::NotFound {
                    host: host.to_string(),
                })
            }
            Err(e) => {
                metrics::counter!("tenantry_resolver_directory_errors_total").increment(1);
                warn!(host = %key, error = %e, "tenant directory lookup failed");
                Err(ResolveError::DirectoryUnavailable(e))
            }
        }
    }

    fn invalidate(&self, host: &str) {
        if let Some(key) = normalize_host(host) {
            if self.cache.invalidate(&key) {
                info!(host = %key, "tenant cache entry invalidated");
            }
        }
    }
}
