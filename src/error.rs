//! API error type for HTTP handlers. Every failure renders as
//! `{"error": "<reason>"}` with a matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::blobs::BlobError;
use crate::mail::MailError;
use crate::storage::StoreError;

#[derive(Debug, PartialEq)]
pub enum ApiError {
    /// missing or malformed input (400)
    Validation(String),
    /// missing or unknown session, bad credentials (401)
    Unauthorized(String),
    /// authenticated but not allowed (403)
    Forbidden(String),
    /// referenced entity absent (404)
    NotFound(String),
    /// duplicate entity (409)
    Conflict(String),
    /// mail transport failure (500)
    Upstream(String),
    /// storage or hashing failure (500)
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::internal(e)
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::InvalidName => Self::validation("Invalid filename"),
            other => Self::internal(other),
        }
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(e: bcrypt::BcryptError) -> Self {
        Self::internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(detail) => {
                // keep storage details out of responses
                error!(%detail, "internal error");
                "Internal server error".to_string()
            }
            ApiError::Validation(m)
            | ApiError::Unauthorized(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Upstream(m) => m,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Mail failures surface with the operation-specific message.
pub fn upstream(e: MailError, msg: &str) -> ApiError {
    error!(error = %e, "mail delivery failed");
    match e {
        MailError::Address(addr) => ApiError::validation(format!("Invalid email address: {}", addr)),
        _ => ApiError::Upstream(msg.to_string()),
    }
}

/// Extension trait for converting options to `ApiError`.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(msg))
    }
}
