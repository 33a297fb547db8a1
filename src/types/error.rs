//! Error types for civic-pulse
//!
//! Every failure maps onto one of five kinds. Validation, conflict, not-found
//! and dependency errors reach the caller of the triggering action; delivery
//! errors are logged where they happen and never leave the channel or notifier.

use hyper::StatusCode;
use std::fmt;

/// Coarse classification used for propagation decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Delivery,
    Dependency,
    Auth,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Auth => "auth",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Main error type for civic-pulse operations
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("Unknown issue status: {0}")]
    InvalidStatus(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("User {user_id} has already verified issue {issue_id}")]
    AlreadyVerified { issue_id: String, user_id: String },

    #[error("Issue {issue_id} is closed ({status})")]
    IssueClosed { issue_id: String, status: String },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store call timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PulseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRating(_) | Self::InvalidStatus(_) | Self::BadRequest(_) => {
                ErrorKind::Validation
            }
            Self::AlreadyVerified { .. } | Self::IssueClosed { .. } | Self::Conflict(_) => {
                ErrorKind::Conflict
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Delivery(_) | Self::WebSocket(_) => ErrorKind::Delivery,
            Self::Database(_) | Self::Timeout(_) => ErrorKind::Dependency,
            Self::Unauthorized(_) | Self::Forbidden(_) => ErrorKind::Auth,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same action unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Database(_) | Self::Timeout(_))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRating(_) => "INVALID_RATING",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::AlreadyVerified { .. } => "ALREADY_VERIFIED",
            Self::IssueClosed { .. } => "ISSUE_CLOSED",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Delivery(_) => "DELIVERY_FAILED",
            Self::Database(_) => "STORE_UNAVAILABLE",
            Self::Timeout(_) => "STORE_TIMEOUT",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::WebSocket(_) => "WEBSOCKET",
            Self::Config(_) => "CONFIG",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRating(_) | Self::InvalidStatus(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AlreadyVerified { .. } | Self::IssueClosed { .. } | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Delivery(_) | Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for PulseError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for PulseError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PulseError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for PulseError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for PulseError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON encode error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for PulseError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for civic-pulse operations
pub type Result<T> = std::result::Result<T, PulseError>;
