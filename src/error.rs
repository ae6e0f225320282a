//! Error types for the Media Resource Manager
//!
//! Provides the error taxonomy surfaced to callers of the manager. Errors are
//! `Clone` because a single terminal outcome of a shared download is delivered
//! to every waiter attached to it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the manager and its components
#[derive(Error, Debug, Clone)]
pub enum Error {
    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Request timed out for {url} after {waited:?}")]
    Timeout { url: String, waited: Duration },

    #[error("Request cancelled: {url}")]
    Cancelled { url: String },

    // =========================================================================
    // Decoding / Lookup Errors
    // =========================================================================
    #[error("Decode failed for {url}: {reason}")]
    DecodeFailed { url: String, reason: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Coarse classification of an [`Error`], stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Transport,
    Timeout,
    Cancelled,
    DecodeFailed,
    NotFound,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::DecodeFailed => write!(f, "decode_failed"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::Configuration(_) => ErrorKind::InvalidInput,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Io(_) | Error::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Check if a wrapping layer may retry the request that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }

    /// Check if this error was caused by the caller cancelling
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    pub(crate) fn cancelled(url: impl fmt::Display) -> Self {
        Error::Cancelled {
            url: url.to_string(),
        }
    }

    /// Attach the limit to a timeout that was raised without one
    pub(crate) fn with_timeout(self, limit: Duration) -> Self {
        match self {
            Error::Timeout { url, waited } if waited.is_zero() => Error::Timeout { url, waited: limit },
            other => other,
        }
    }

    pub(crate) fn transport(url: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Transport {
            url: url.to_string(),
            message: message.into(),
            status: None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            Error::Timeout {
                url,
                waited: Duration::ZERO,
            }
        } else {
            Error::Transport {
                url,
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidInput(format!("malformed URL: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Result type alias for the manager
pub type Result<T> = std::result::Result<T, Error>;
