use std::time::Duration;

/// Tenancy policy: cache lifetime, bounded waits, pool sizing, admin access.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// How long a resolved tenant stays cached.
    pub cache_ttl: Duration,
    /// Upper bound on one directory lookup.
    pub lookup_timeout: Duration,
    /// Upper bound on the liveness probe run when opening a data context.
    pub probe_timeout: Duration,
    /// Interval between background purges of expired cache entries.
    pub sweep_interval: Duration,
    /// Maximum pooled connections per tenant store.
    pub max_connections_per_tenant: u32,
    /// Bearer token for the admin API. The admin routes are not mounted
    /// when this is `None`.
    pub admin_token: Option<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 60),
            lookup_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            max_connections_per_tenant: 10,
            admin_token: None,
        }
    }
}
