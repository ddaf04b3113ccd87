//! Error types shared by the source and destination clients and the sync engine.
//!
//! Two layers:
//! - [`ClientError`] is what a single call against an external system returns.
//!   It knows whether retrying could help ([`ClientError::is_transient`]).
//! - [`SyncError`] is what a record (or a whole run) fails with. Every record
//!   level failure is classified into one of its variants so the run summary
//!   and the failed-record report can say what went wrong.

use std::time::Duration;

use thiserror::Error;

use crate::entity::EntityKind;
use crate::retry::RetryHint;

/// Errors returned by a single call against the ERP or the CRM.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The remote system asked us to slow down (HTTP 429).
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The remote system failed on its side (HTTP 5xx).
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Credentials were rejected (HTTP 401/403).
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The request was understood and refused (any other HTTP 4xx).
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Invalid response: {message}")]
    Decode { message: String },

    /// The client itself is misconfigured (bad base URL, unbuildable transport).
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Map a non-2xx HTTP status and body into the matching error.
    pub fn from_status(status: u16, body: &[u8], retry_after: Option<Duration>) -> Self {
        let message = String::from_utf8_lossy(body).trim().to_string();
        match status {
            401 | 403 => Self::Auth { status, message },
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Whether a retry of the same call could succeed.
    ///
    /// Timeouts, dropped connections, rate limiting and 5xx responses are
    /// transient. Everything else will fail the same way again.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Wait the server asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. }
            | Self::Auth { status, .. }
            | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl RetryHint for ClientError {
    fn retry_after(&self) -> Option<Duration> {
        ClientError::retry_after(self)
    }
}

/// Get a short error message suitable for progress output.
pub fn short_error_message(err: &ClientError) -> String {
    match err {
        ClientError::Network { .. } => "Network error".to_string(),
        ClientError::RateLimited { .. } => "Rate limited".to_string(),
        ClientError::Decode { .. } => "Invalid response".to_string(),
        ClientError::Config(msg) => format!("Config: {msg}"),
        ClientError::Server { status, message }
        | ClientError::Auth { status, message }
        | ClientError::Rejected { status, message } => {
            if message.chars().count() > 50 {
                let truncated: String = message.chars().take(47).collect();
                format!("HTTP {status}: {truncated}...")
            } else {
                format!("HTTP {status}: {message}")
            }
        }
    }
}

/// A source record that cannot be mapped to destination properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// A field the mapping depends on is absent or null.
    #[error("missing required field {field}")]
    MissingField { field: &'static str },

    /// A field is present but its value cannot be used.
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Record-level and run-level sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An external system cannot be reached at all. Fatal to the run.
    #[error("{system} is unreachable: {source}")]
    Connectivity {
        system: &'static str,
        #[source]
        source: ClientError,
    },

    /// A call kept failing transiently until retries were exhausted.
    #[error("gave up after retries: {0}")]
    Transient(#[source] ClientError),

    /// The record is structurally invalid or the destination refused it.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Linking two destination records failed. The records themselves stand.
    #[error("association {from} -> {to} failed: {message}")]
    Association {
        from: EntityKind,
        to: EntityKind,
        message: String,
    },

    /// The source read for an entity kind failed as a whole.
    #[error("reading {kind} from source failed: {source}")]
    SourceRead {
        kind: EntityKind,
        #[source]
        source: ClientError,
    },

    /// Unexpected failure inside the engine (panicked task, closed semaphore).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a validation error.
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an association error.
    pub fn association(from: EntityKind, to: EntityKind, message: impl Into<String>) -> Self {
        Self::Association {
            from,
            to,
            message: message.into(),
        }
    }

    /// Stable label used in logs and the failed-record report.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity",
            Self::Transient(_) => "transient",
            Self::Validation { .. } => "validation",
            Self::Association { .. } => "association",
            Self::SourceRead { .. } => "source_read",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether this error should abort the whole run.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

impl From<ClientError> for SyncError {
    /// Classify a client failure surfacing at the record boundary.
    ///
    /// Transient errors reaching this point have already been retried.
    fn from(err: ClientError) -> Self {
        if err.is_transient() {
            Self::Transient(err)
        } else {
            Self::Validation {
                message: err.to_string(),
            }
        }
    }
}

impl From<TransformError> for SyncError {
    fn from(err: TransformError) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
