//! Error types for Parlor
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses
//! and maps onto the gateway's structured error events.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required or token invalid (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied — not a member or wrong role (403)
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Validation error — malformed input (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not valid in the entity's current state (409):
    /// edit/recall window expired, already recalled, duplicate pending request
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token signing/verification error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Stable machine-readable kind, used both as the metrics label and as
    /// the `kind` field of gateway `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not-found",
            AppError::Unauthorized => "authentication-failure",
            AppError::Forbidden(_) => "authorization-denied",
            AppError::Validation(_) => "validation",
            AppError::InvalidState(_) => "invalid-state",
            AppError::Database(_) => "storage-failure",
            AppError::Config(_) => "config",
            AppError::Encryption(_) => "encryption",
            AppError::Internal(_) => "internal",
        }
    }

    /// Message safe to surface to the originating client.
    ///
    /// Storage and internal failures are reported generically; the full
    /// cause stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Storage unavailable".to_string(),
            AppError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Encryption(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind(), "http"]).inc();

        let body = Json(serde_json::json!({
            "error": self.client_message(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_gateway_taxonomy() {
        assert_eq!(AppError::Unauthorized.kind(), "authentication-failure");
        assert_eq!(
            AppError::Forbidden("not a member".into()).kind(),
            "authorization-denied"
        );
        assert_eq!(AppError::NotFound.kind(), "not-found");
        assert_eq!(
            AppError::InvalidState("recall window expired".into()).kind(),
            "invalid-state"
        );
        assert_eq!(
            AppError::Database(sqlx::Error::PoolTimedOut).kind(),
            "storage-failure"
        );
    }

    #[test]
    fn storage_failures_are_reported_generically() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.client_message(), "Storage unavailable");
    }
}
