//! Error types for the Gateway API service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use portcullis_auth_core::AuthError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: &'static str,
}

/// API error type
///
/// The wrapped detail is logged but never rendered.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(e) => StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "Sign-in failed. Please try again.",
            StatusCode::SERVICE_UNAVAILABLE => {
                "The identity provider is unavailable. Please try again later."
            }
            _ => "An internal error occurred.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::Auth(e) if e.is_authentication_failure() => {
                tracing::warn!(error = %e, code = self.error_code(), "Authentication failed");
            }
            _ => tracing::error!(error = ?self, "Internal API error"),
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
