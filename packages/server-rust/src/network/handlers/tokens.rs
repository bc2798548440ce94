//! Token endpoints. Each handler works on the data context bound to the
//! request by the tenant-binding layer.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::Json;
use tenantry_core::{NewToken, TenantSummary, Token};

use super::ApiError;
use crate::network::TenantContext;

/// `GET /tokens` (and the legacy `GET /test-muilti-tenant`).
pub async fn list_tokens(ctx: TenantContext) -> Result<Json<Vec<Token>>, ApiError> {
    Ok(Json(ctx.data().list_tokens().await?))
}

/// `GET /tokens/{id}`
pub async fn get_token(ctx: TenantContext, Path(id): Path<i64>) -> Result<Json<Token>, ApiError> {
    ctx.data()
        .get_token(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("token not found"))
}

/// `POST /tokens`. The hash is computed server-side from `data`.
pub async fn create_token(
    ctx: TenantContext,
    Json(token): Json<NewToken>,
) -> Result<(StatusCode, Json<Token>), ApiError> {
    let created = ctx.data().insert_token(token).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `DELETE /tokens/{id}`
pub async fn delete_token(ctx: TenantContext, Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    if ctx.data().delete_token(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("token not found"))
    }
}

/// `GET /tenant`: the tenant serving this host, without its descriptor.
pub async fn current_tenant(ctx: TenantContext) -> Json<TenantSummary> {
    Json(ctx.tenant().summary())
}
