//! Health, liveness, readiness and tenant-store health handlers.
//!
//! None of these routes go through tenant binding.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::{ApiError, AppState};
use crate::network::HealthState;
use crate::service::{TenantHealthReport, TenantHealthStatus};

/// Returns process health as JSON.
///
/// Always 200; the `state` field tells "up but draining" apart from "ready".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.lifecycle.health_state();

    Json(json!({
        "state": health.as_str(),
        "open_data_contexts": state.lifecycle.ledger().open_count(),
        "cached_tenants": state.cache.len(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe, always 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when ready, 503 while starting, draining or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.lifecycle.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Probes every active tenant store.
///
/// 200 for healthy or degraded, 503 for unhealthy.
pub async fn tenant_health_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report: TenantHealthReport = state.tenants.health().await?;
    let status = match report.status {
        TenantHealthStatus::Healthy | TenantHealthStatus::Degraded => StatusCode::OK,
        TenantHealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(report)).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tenantry_core::{ConnectionDescriptor, NewTenant};

    use super::*;
    use crate::datacontext::{HandleLedger, MemoryDataContextFactory};
    use crate::directory::MemoryDirectory;
    use crate::network::Lifecycle;
    use crate::resolver::{CachingTenantResolver, TenantCache};
    use crate::service::TenantService;
    use crate::traits::{DataContextFactory, TenantDirectory, TenantResolver};

    struct Fixture {
        state: AppState,
        directory: Arc<MemoryDirectory>,
        factory: Arc<MemoryDataContextFactory>,
    }

    fn fixture() -> Fixture {
        let ledger = HandleLedger::new();
        let directory = Arc::new(MemoryDirectory::new());
        let cache = Arc::new(TenantCache::new(Duration::from_secs(1800)));
        let resolver = Arc::new(CachingTenantResolver::new(
            Arc::clone(&directory) as Arc<dyn TenantDirectory>,
            Arc::clone(&cache),
            Duration::from_secs(5),
        ));
        let factory = Arc::new(MemoryDataContextFactory::new(
            Duration::from_secs(5),
            ledger.clone(),
        ));
        let tenants = Arc::new(TenantService::new(
            Arc::clone(&directory) as Arc<dyn TenantDirectory>,
            resolver as Arc<dyn TenantResolver>,
            Arc::clone(&factory) as Arc<dyn DataContextFactory>,
        ));
        let state = AppState {
            lifecycle: Arc::new(Lifecycle::new(ledger)),
            cache,
            tenants,
            admin_token: None,
            start_time: Instant::now(),
        };
        Fixture {
            state,
            directory,
            factory,
        }
    }

    async fn add(directory: &MemoryDirectory, name: &str) {
        directory
            .create(NewTenant {
                name: name.to_string(),
                domain: format!("{name}.example"),
                connection: ConnectionDescriptor::new(format!("memory://{name}")),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let f = fixture();
        f.state.lifecycle.set_ready();

        let json = health_handler(State(f.state)).await.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["open_data_contexts"], 0);
        assert_eq!(json["cached_tenants"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_handler_reports_draining_state() {
        let f = fixture();
        f.state.lifecycle.set_ready();
        f.state.lifecycle.trigger_shutdown();

        let json = health_handler(State(f.state)).await.0;
        assert_eq!(json["state"], "draining");
    }

    #[tokio::test]
    async fn health_handler_reports_open_data_contexts() {
        let f = fixture();
        let ctx = f
            .factory
            .open(&ConnectionDescriptor::new("memory://acme"))
            .await
            .unwrap();

        let json = health_handler(State(f.state.clone())).await.0;
        assert_eq!(json["open_data_contexts"], 1);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_handler_returns_503_until_ready() {
        let f = fixture();
        assert_eq!(
            readiness_handler(State(f.state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        f.state.lifecycle.set_ready();
        assert_eq!(readiness_handler(State(f.state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn tenant_health_with_no_tenants_is_degraded() {
        let f = fixture();
        let response = tenant_health_handler(State(f.state)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tenant_health_is_503_when_most_stores_are_down() {
        let f = fixture();
        add(&f.directory, "acme").await;
        add(&f.directory, "globex").await;
        add(&f.directory, "initech").await;
        f.factory.set_reachable("acme", false);
        f.factory.set_reachable("globex", false);

        let response = tenant_health_handler(State(f.state)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
