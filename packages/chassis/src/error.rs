//! Error taxonomy shared by every chassis component.
//!
//! [`ChassisError`] is the only error type that crosses a public chassis
//! boundary. Ports (readers, publishers, handlers) are free to use
//! `anyhow::Error` internally; the chassis either wraps those into
//! [`ChassisError::Internal`] or, on the event and aggregation paths,
//! downgrades them to DLQ records and degraded widgets.
//!
//! Each variant has a stable snake_case [`ErrorKind`] code that the HTTP
//! layer maps to a status code.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Stable, transport-independent error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidInput,
    Conflict,
    IdempotencyRequired,
    IdempotencyConflict,
    InvalidEnvelope,
    UnsupportedEventType,
    RateLimited,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IdempotencyRequired => "idempotency_required",
            ErrorKind::IdempotencyConflict => "idempotency_conflict",
            ErrorKind::InvalidEnvelope => "invalid_envelope",
            ErrorKind::UnsupportedEventType => "unsupported_event_type",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Whether details of this kind may be shown to the caller verbatim.
    ///
    /// Internal failures only ever expose a generic message.
    pub fn is_client_safe(&self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ChassisError {
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("idempotency key required for mutating operations")]
    IdempotencyRequired,

    #[error("idempotency key {key} was already used with a different request payload")]
    IdempotencyConflict { key: String },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChassisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChassisError::Unauthorized => ErrorKind::Unauthorized,
            ChassisError::Forbidden(_) => ErrorKind::Forbidden,
            ChassisError::NotFound(_) => ErrorKind::NotFound,
            ChassisError::InvalidInput(_) => ErrorKind::InvalidInput,
            ChassisError::Conflict(_) => ErrorKind::Conflict,
            ChassisError::IdempotencyRequired => ErrorKind::IdempotencyRequired,
            ChassisError::IdempotencyConflict { .. } => ErrorKind::IdempotencyConflict,
            ChassisError::InvalidEnvelope(_) => ErrorKind::InvalidEnvelope,
            ChassisError::UnsupportedEventType(_) => ErrorKind::UnsupportedEventType,
            ChassisError::RateLimited { .. } => ErrorKind::RateLimited,
            ChassisError::Cancelled => ErrorKind::Cancelled,
            ChassisError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Message suitable for an API response body.
    pub fn safe_message(&self) -> String {
        if self.kind().is_client_safe() {
            self.to_string()
        } else {
            "An internal error occurred".to_string()
        }
    }
}

pub type Result<T, E = ChassisError> = std::result::Result<T, E>;
