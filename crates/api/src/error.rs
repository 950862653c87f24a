//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{TenantError, TransactionId};
use message_bus::BusError;
use saga::SagaError;
use saga_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// The request does not name a valid tenant.
    #[error("missing or invalid tenant headers: {0}")]
    Tenant(String),

    #[error("saga {0} not found")]
    NotFound(TransactionId),

    #[error("saga {0} already exists")]
    Conflict(TransactionId),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Tenant(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Invalid(reason) => ApiError::BadRequest(reason),
            SagaError::Duplicate(transaction_id) => ApiError::Conflict(transaction_id),
            SagaError::NotFound(transaction_id) => ApiError::NotFound(transaction_id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        ApiError::Tenant(err.to_string())
    }
}

/// Reasons the service fails to come up, each with its process exit code.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("persistence unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("saga recovery failed: {0}")]
    Saga(#[from] SagaError),

    #[error("conversation definitions: {0}")]
    Conversations(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StartupError {
    /// 2 when persistence is unreachable, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Store(e) if e.is_unavailable() => 2,
            StartupError::Saga(SagaError::Store(e)) if e.is_unavailable() => 2,
            _ => 1,
        }
    }
}
