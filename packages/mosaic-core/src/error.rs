//! Centralized error types for the mosaic-core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the mosaic-cast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// A referenced channel ID does not exist in the current catalog.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// The requested layout kind or slot count is structurally invalid.
    #[error("bad layout: {0}")]
    BadLayout(String),

    /// A custom slot's geometry violates the aspect or bounds rules.
    #[error("bad geometry: {0}")]
    BadGeometry(String),

    /// A channel resolved to a stream URL that the encoder could not open.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The media-processing subprocess failed to start or exited unexpectedly.
    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    /// The cold-start deadline elapsed before the encoder produced output.
    #[error("startup timed out: {0}")]
    StartupTimeout(String),

    /// A state-changing request arrived while another transition was in flight.
    #[error("busy: {0}")]
    Busy(String),

    /// Client sent a malformed or semantically invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Catalog refresh failed to fetch or parse the M3U source.
    #[error("catalog refresh failed: {0}")]
    CatalogUnavailable(String),

    /// Anything else that doesn't fit the named categories above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadLayout(_) => "bad_layout",
            Self::BadGeometry(_) => "bad_geometry",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::EncoderFailed(_) => "encoder_failed",
            Self::StartupTimeout(_) => "startup_timeout",
            Self::Busy(_) => "busy",
            Self::InvalidRequest(_) => "invalid_request",
            Self::CatalogUnavailable(_) => "catalog_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl AppError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        ErrorCode::code(self)
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadLayout(_) | Self::BadGeometry(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::EncoderFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StartupTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AppResult<T> = Result<T, AppError>;

/// JSON response body for error responses, matching the `{ error, detail? }`
/// envelope from §6.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            detail: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_returns_correct_code() {
        let err = AppError::NotFound("chan-1".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_geometry_is_bad_request() {
        let err = AppError::BadGeometry("aspect ratio off by 4%".into());
        assert_eq!(err.code(), "bad_geometry");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn busy_is_conflict() {
        let err = AppError::Busy("layout change already in progress".into());
        assert_eq!(err.code(), "busy");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn startup_timeout_is_gateway_timeout() {
        let err = AppError::StartupTimeout("no frames after 30s".into());
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
