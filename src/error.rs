use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::signature::codec::SIGNATURE_ALGORITHM;
use crate::validator::ValidationStage;

/// Application-wide error types with appropriate HTTP status codes.
///
/// These cover startup and handler failures. Per-request authentication
/// failures are [`AuthError`] and always surface as a signed 401.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The shared nonce cache is unreachable and the in-process fallback is disabled.
    #[error("Cache backend unavailable: {0}")]
    CacheBackendUnavailable(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        tracing::error!(error = %self, "Request failed");

        let (status, error_type, message) = match &self {
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.".to_string(),
            ),
            AppError::CacheBackendUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "cache_unavailable",
                "Nonce cache is temporarily unavailable. Please try again later.".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

/// Reasons a request fails signature authentication.
///
/// The `Display` text is the client-facing `message` of the 401 body.
/// [`AuthError::details`] carries diagnostics that are only exposed in
/// debug mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// One or more of the signature, timestamp and nonce headers is absent or empty.
    #[error("Missing headers: {}", .0.join(", "))]
    MissingHeaders(Vec<&'static str>),

    #[error("Invalid timestamp format")]
    InvalidTimestampFormat { timestamp: String },

    /// `|now - timestamp|` exceeded the validity window.
    #[error("Request expired (age: {age}s)")]
    RequestExpired { age: u64, max_age: u64 },

    /// The nonce has already been accepted within its validity period.
    #[error("Replay attack detected")]
    ReplayDetected { nonce_hint: String },

    #[error("Invalid signature")]
    InvalidSignature,

    /// The nonce store failed or timed out, or the body could not be read.
    /// Always a rejection.
    #[error("Validation error")]
    ValidationInternal(String),
}

impl AuthError {
    /// Stable snake_case identifier, used as a log field and metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingHeaders(_) => "missing_headers",
            AuthError::InvalidTimestampFormat { .. } => "invalid_timestamp_format",
            AuthError::RequestExpired { .. } => "request_expired",
            AuthError::ReplayDetected { .. } => "replay_detected",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::ValidationInternal(_) => "validation_internal_error",
        }
    }

    /// The last validation stage that completed before the rejection.
    pub fn stage(&self) -> ValidationStage {
        match self {
            AuthError::MissingHeaders(_) => ValidationStage::Start,
            AuthError::InvalidTimestampFormat { .. } | AuthError::RequestExpired { .. } => {
                ValidationStage::HeadersExtracted
            }
            AuthError::ReplayDetected { .. } => ValidationStage::TimestampChecked,
            AuthError::InvalidSignature => ValidationStage::NonceChecked,
            AuthError::ValidationInternal(_) => ValidationStage::Start,
        }
    }

    /// Diagnostic details for debug-mode error bodies.
    pub fn details(&self) -> Value {
        let mut details = match self {
            AuthError::MissingHeaders(missing) => json!({ "missing": missing }),
            AuthError::InvalidTimestampFormat { timestamp } => json!({ "timestamp": timestamp }),
            AuthError::RequestExpired { age, max_age } => json!({ "age": age, "max_age": max_age }),
            AuthError::ReplayDetected { nonce_hint } => json!({ "nonce": nonce_hint }),
            AuthError::InvalidSignature => json!({ "method": SIGNATURE_ALGORITHM }),
            AuthError::ValidationInternal(error) => json!({ "error": error }),
        };
        if let Some(map) = details.as_object_mut() {
            map.insert("stage".to_string(), json!(self.stage()));
        }
        details
    }
}

/// Shorten a nonce for logs and diagnostics: first 8 characters plus `...`.
pub fn nonce_hint(nonce: &str) -> String {
    let prefix: String = nonce.chars().take(8).collect();
    format!("{prefix}...")
}
