//! Error types for vidfed
//!
//! All errors in the crate are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// SQLite busy/locked result codes, plus PostgreSQL serialization failure
/// and deadlock codes
const TRANSIENT_CODES: &[&str] = &["5", "6", "261", "262", "517", "40001", "40P01"];

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Access denied, e.g. blocked sender (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Actor acting on an object it does not own (403)
    #[error("Authorization violation: {0}")]
    AuthorizationViolation(String),

    /// Transient conflicts outlasted the retry budget (503)
    #[error("Transaction conflict in {label} after {attempts} attempts")]
    TransactionConflict { label: &'static str, attempts: u32 },

    /// Remote object resolution exceeded its deadline (504)
    #[error("Timed out resolving {0}")]
    ResolveTimeout(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error, malformed or unexpected remote data (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Federation(format!("malformed activity: {err}"))
    }
}

impl AppError {
    /// Whether the error is a busy/locked/serialization conflict that a
    /// fresh transaction may not hit
    pub fn is_transient_conflict(&self) -> bool {
        let AppError::Database(error) = self else {
            return false;
        };

        match error {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_error) => {
                if db_error.is_unique_violation() {
                    return true;
                }
                let code_matches = db_error
                    .code()
                    .map(|code| TRANSIENT_CODES.contains(&code.as_ref()))
                    .unwrap_or(false);
                code_matches || db_error.message().contains("database is locked")
            }
            _ => false,
        }
    }

    /// Whether the peer retrying the same delivery later may succeed
    ///
    /// Authorization violations, validation failures and blocks fail
    /// identically on every retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransactionConflict { .. }
            | AppError::ResolveTimeout(_)
            | AppError::HttpClient(_)
            | AppError::Database(_)
            | AppError::Internal(_) => true,
            AppError::NotFound
            | AppError::Forbidden
            | AppError::Validation(_)
            | AppError::AuthorizationViolation(_)
            | AppError::Federation(_)
            | AppError::Config(_) => false,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Forbidden => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::AuthorizationViolation(_) => "authorization_violation",
            AppError::TransactionConflict { .. } => "transaction_conflict",
            AppError::ResolveTimeout(_) => "resolve_timeout",
            AppError::Database(_) => "database",
            AppError::HttpClient(_) => "http_client",
            AppError::Federation(_) => "federation",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
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

        let (status, error_message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::AuthorizationViolation(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::TransactionConflict { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::ResolveTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
