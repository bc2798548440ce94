//! Tenancy services that sit beside the request path.
//!
//! - `config`: tenancy policy (cache TTL, bounded waits, admin access)
//! - `tenants`: tenant management with cache invalidation, store health
//! - `worker`: background tasks, including the tenant cache sweeper

pub mod config;
pub mod tenants;
pub mod worker;

pub use config::TenancyConfig;
pub use tenants::{ProbeOutcome, TenantHealthReport, TenantHealthStatus, TenantService};
pub use worker::{BackgroundRunnable, BackgroundWorker, CacheSweeper};
