//! JSON error responses for the token and admin APIs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::datacontext::DataContextError;
use crate::directory::DirectoryError;

/// Error returned by JSON handlers. Rendered as `{"error": "..."}`.
///
/// Server-side failures render a generic message; their cause is logged.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("service unavailable")]
    Unavailable(#[source] anyhow::Error),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Unavailable(cause) | Self::Internal(cause) => {
                error!(error = %cause, "request failed");
            }
            _ => {}
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound { .. } => Self::NotFound("tenant not found"),
            DirectoryError::Conflict { domain } => {
                Self::Conflict(format!("domain already assigned: {domain}"))
            }
            DirectoryError::Invalid(e) => Self::BadRequest(e.to_string()),
            e @ (DirectoryError::Unavailable(_) | DirectoryError::Timeout { .. }) => {
                Self::Unavailable(e.into())
            }
            e @ DirectoryError::Backend(_) => Self::Internal(e.into()),
        }
    }
}

impl From<DataContextError> for ApiError {
    fn from(err: DataContextError) -> Self {
        match err {
            DataContextError::Conflict { hash } => {
                Self::Conflict(format!("token with hash {hash} already exists"))
            }
            e => Self::Internal(e.into()),
        }
    }
}
