//! Handler-boundary error type.
//!
//! Every JSON handler returns `Result<_, ApiError>`. The response body is
//! always `{ "success": false, "error", "code", "details"? }`; `details` is
//! only rendered outside production.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use crate::core::store::StoreError;
use crate::security::auth_api::error::AuthError;

static PRODUCTION: AtomicBool = AtomicBool::new(false);

/// Set once at startup from `APP_ENV`.
pub fn set_production_mode(production: bool) {
    PRODUCTION.store(production, Ordering::Relaxed);
}

pub fn is_production() -> bool {
    PRODUCTION.load(Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    /// Uniqueness violation that retrying cannot fix (duplicate email etc).
    #[error("{0}")]
    Conflict(String),

    /// Code generation gave up after its retry budget.
    #[error("{0}")]
    RetryExhausted(String),

    /// Operation refused because dependent records exist.
    #[error("{0}")]
    Blocked(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Validation {
            details: Some(serde_json::json!({ "field": field, "message": message })),
            message: format!("Invalid {field}"),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(auth) => auth.status_code(),
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::RetryExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Blocked(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(auth) => auth.error_code(),
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "insufficient_permissions",
            Self::Conflict(_) => "conflict",
            Self::RetryExhausted(_) => "conflict",
            Self::Blocked(_) => "blocked",
            Self::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Auth(auth) => auth.message(),
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::Internal(detail) => Some(Value::String(detail.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{}: {}", self.error_code(), self);
        }
        let body = ErrorBody {
            success: false,
            error: self.public_message(),
            code: self.error_code(),
            details: if is_production() { None } else { self.details() },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("Resource"),
            StoreError::UniqueViolation(field) => {
                Self::Conflict(format!("A record with this {} already exists", field.label()))
            }
            StoreError::ForeignKeyViolation(detail) => {
                warn!("Foreign key violation: {detail}");
                Self::Blocked("Record is still referenced by other records".to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
