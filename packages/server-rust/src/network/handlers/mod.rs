//! HTTP handler definitions for the `tenantry` server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod admin;
pub mod error;
pub mod health;
pub mod tokens;

pub use error::ApiError;
pub use health::{health_handler, liveness_handler, readiness_handler, tenant_health_handler};
pub use tokens::{create_token, current_tenant, delete_token, get_token, list_tokens};

use std::sync::Arc;
use std::time::Instant;

use super::Lifecycle;
use crate::resolver::TenantCache;
use crate::service::TenantService;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap. Tenant
/// data access does not go through here; it arrives per request as a
/// [`TenantContext`](super::TenantContext).
#[derive(Clone)]
pub struct AppState {
    /// Health state and the ledger of open tenant data contexts.
    pub lifecycle: Arc<Lifecycle>,
    /// Resolver cache, reported by the health endpoint.
    pub cache: Arc<TenantCache>,
    /// Tenant management and store health checks.
    pub tenants: Arc<TenantService>,
    /// Bearer token guarding the admin API.
    pub admin_token: Option<Arc<str>>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
