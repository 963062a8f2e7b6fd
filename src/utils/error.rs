//! Error types shared across the ingestion pipeline.
//!
//! `ErrorKind` is the single taxonomy every component maps failures onto;
//! the supervisor's retry policy and the HTTP layer both key off it.
//! `ApiError` is the axum-facing error with an `IntoResponse` impl.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::utils::sanitize::redact_text;

/// Result alias for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Error taxonomy
// ============================================================================

/// Error categories used for retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection, DNS, socket level failures
    Network,
    /// Upstream did not respond within budget
    Timeout,
    /// Upstream or internal limiter signaled saturation
    RateLimit,
    /// Credentials rejected
    Auth,
    /// Credentials valid, action forbidden
    Permission,
    /// Resource absent
    NotFound,
    /// Input or output failed schema or invariant checks
    Validation,
    /// Upstream payload malformed
    Parsing,
    /// LLM output unparseable and fallback also failed
    Extraction,
    /// Bug; reported, never retried
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Parsing => "parsing",
            Self::Extraction => "extraction",
            Self::Internal => "internal",
        }
    }

    /// Whether errors of this kind may be retried at all.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimit)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Pipeline error
// ============================================================================

/// Error carried through collectors, processing, and the repository.
///
/// Messages are redacted at construction so that no credential material
/// can reach logs, DLQ contexts, or HTTP bodies.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Upstream wait hint (e.g. from a `Retry-After` header)
        retry_after: Option<Duration>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed payload: {0}")]
    Parsing(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(redact_text(&msg.into()))
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(redact_text(&msg.into()))
    }

    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit { message: redact_text(&msg.into()), retry_after }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(redact_text(&msg.into()))
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(redact_text(&msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(redact_text(&msg.into()))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(redact_text(&msg.into()))
    }

    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(redact_text(&msg.into()))
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(redact_text(&msg.into()))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(redact_text(&msg.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Permission(_) => ErrorKind::Permission,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Parsing(_) => ErrorKind::Parsing,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Upstream wait hint, when one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Self::network(e.to_string())
        } else if e.is_decode() {
            Self::parsing(e.to_string())
        } else {
            Self::network(e.to_string())
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::not_found(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::validation(e.to_string())
            }
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        Self::parsing(e.to_string())
    }
}

// ============================================================================
// HTTP-facing error
// ============================================================================

/// Error returned from axum handlers as a JSON body.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: redact_text(&message.into()) }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { error: self.message };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match e.kind() {
            ErrorKind::Validation | ErrorKind::Parsing => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Network | ErrorKind::Timeout => StatusCode::BAD_GATEWAY,
            ErrorKind::Extraction | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Message already redacted by the IngestError constructors
        Self { status, message: e.to_string() }
    }
}
