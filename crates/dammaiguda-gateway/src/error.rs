//! API error type and responses.
//!
//! Every crate error is converted into one [`ApiError`] at the edge. The
//! wire shape is `{"error": {"code", "message"}}` with a stable `code` the
//! clients switch on; WebSocket error frames reuse the same codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use dammaiguda_auth::AuthError;
use dammaiguda_chat::ChatError;
use dammaiguda_geo::GeoError;
use dammaiguda_notify::AlertError;
use dammaiguda_store::StoreError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed, or expired credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// The caller may not perform this operation.
    #[error("{0}")]
    Forbidden(String),

    /// The requested resource was not found.
    #[error("{0}")]
    NotFound(String),

    /// The request lost a race with another writer or targets a settled
    /// state.
    #[error("{0}")]
    Conflict(String),

    /// A precondition for the operation does not hold.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Invalid request body or parameters.
    #[error("{0}")]
    InvalidArgument(String),

    /// Internal server error. The message is logged, not returned.
    #[error("internal error")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// The HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable error code clients switch on.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal(_) => "internal",
        }
    }

    /// Build an error from an HTTP status code and a message, inverting the
    /// per-crate `http_status_code` mappings.
    fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidArgument(message),
            401 => Self::Unauthenticated(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            412 => Self::PreconditionFailed(message),
            _ => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal(detail) = &self {
            tracing::error!(detail, "internal error");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Unauthenticated(err.to_string())
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::from_status(err.http_status_code(), err.to_string())
    }
}

impl From<GeoError> for ApiError {
    fn from(err: GeoError) -> Self {
        Self::from_status(err.http_status_code(), err.to_string())
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        Self::from_status(err.http_status_code(), err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("not found".to_owned()),
            StoreError::Conflict => Self::Conflict("conflict".to_owned()),
            other => Self::Internal(other.to_string()),
        }
    }
}
