//! Error types for the swap sentinel

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP statuses that are worth another attempt
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Main error type for the sentinel
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown ticker: {0}")]
    UnknownTicker(String),

    // Retrieval errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    // Data errors
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Notification errors
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    ///
    /// Timeouts and cancellation end the attempt chain and are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// Check if this error should count against a circuit breaker
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Error::Timeout(_)) || self.is_retryable()
    }

    /// Server-provided retry hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Http {
                status: 429,
                retry_after,
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Decode(e.without_url().to_string())
        } else {
            Error::Transport(e.without_url().to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::InvalidAmount(e.to_string())
    }
}
