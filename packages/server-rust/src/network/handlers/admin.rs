//! Tenant administration API.
//!
//! Mounted only when an admin token is configured. Every route requires
//! `Authorization: Bearer <token>`; the token is compared in constant time.

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tenantry_core::{NewTenant, TenantId, TenantSummary, TenantUpdate};
use tracing::warn;

use super::{ApiError, AppState};
use crate::service::ProbeOutcome;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Rejects requests without the configured bearer token.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        next.run(req).await
    } else {
        warn!(path = %req.uri().path(), "admin request rejected");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response()
    }
}

/// `GET /admin/tenants?includeInactive=true`
pub async fn list_tenants(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TenantSummary>>, ApiError> {
    Ok(Json(state.tenants.list(params.include_inactive).await?))
}

/// `POST /admin/tenants`
pub async fn create_tenant(
    State(state): State<AppState>,
    Json(tenant): Json<NewTenant>,
) -> Result<(StatusCode, Json<TenantSummary>), ApiError> {
    let created = state.tenants.create(tenant).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /admin/tenants/{id}`
pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TenantSummary>, ApiError> {
    Ok(Json(state.tenants.get(TenantId(id)).await?))
}

/// `PUT /admin/tenants/{id}`
pub async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<TenantUpdate>,
) -> Result<Json<TenantSummary>, ApiError> {
    Ok(Json(state.tenants.update(TenantId(id), update).await?))
}

/// `DELETE /admin/tenants/{id}`: deactivates, never hard-deletes.
pub async fn deactivate_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TenantSummary>, ApiError> {
    Ok(Json(state.tenants.deactivate(TenantId(id)).await?))
}

/// `POST /admin/tenants/{id}/probe`
pub async fn probe_tenant(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProbeOutcome>, ApiError> {
    Ok(Json(state.tenants.probe(TenantId(id)).await?))
}
