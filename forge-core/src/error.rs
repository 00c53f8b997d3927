//! Error handling for Forge API calls.
//!
//! Every way a logical call can fail is a variant of [`Error`], so callers
//! can match exhaustively on the failure kind instead of inspecting strings.
//! Local gate rejections ([`Error::RateLimitExceeded`],
//! [`Error::CircuitBreakerOpen`]) never reach the network; remote failures
//! carry the status and body the service returned.
//!
//! # Examples
//!
//! ```rust
//! use forge_core::error::{Error, Result};
//! use std::time::Duration;
//!
//! fn handle(result: Result<()>) -> Option<Duration> {
//!     match result {
//!         Err(err) if !err.is_retryable() => err.retry_after(),
//!         _ => None,
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Broad class of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, reset, or name resolution failed
    Connect,
    /// The attempt did not finish within its deadline
    Timeout,
    /// Anything else the transport could not complete
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Failure raised by a transport before any HTTP status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }
}

/// Comprehensive error type for Forge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The local sliding window is full
    #[error("Rate limit exceeded, retry in {}s", .wait.as_secs())]
    RateLimitExceeded { wait: Duration },

    /// The circuit breaker is rejecting calls
    #[error("Circuit breaker open, retry in {}s", .wait.as_secs())]
    CircuitBreakerOpen { wait: Duration },

    /// The service rejected the request (4xx)
    #[error("Client error {status}: {body}")]
    Client { status: u16, body: String },

    /// The service failed to handle the request (5xx)
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// Connection, timeout or DNS-class failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The caller cancelled the call
    #[error("Request cancelled")]
    Cancelled,

    /// The request could not be built (bad path, unserializable body)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A successful response carried a body that is not valid JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// Client configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results with Forge errors.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether the retry policy may re-attempt a call that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Server { .. } | Error::Transport(_))
    }

    /// How long a gate rejection asks the caller to wait.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimitExceeded { wait } | Error::CircuitBreakerOpen { wait } => Some(*wait),
            _ => None,
        }
    }

    /// HTTP status for remote failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Client { status, .. } | Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Server { status: 502, body: String::new() }.is_retryable());
        assert!(Error::from(TransportError::timeout("deadline")).is_retryable());
        assert!(!Error::Client { status: 404, body: String::new() }.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::RateLimitExceeded { wait: Duration::from_secs(1) }.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::RateLimitExceeded { wait: Duration::from_secs(42) };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry in 42s");

        let err = Error::from(TransportError::connect("refused"));
        assert_eq!(err.to_string(), "Transport error: connect failure: refused");

        let err = Error::Client { status: 404, body: "Not Found".into() };
        assert_eq!(err.to_string(), "Client error 404: Not Found");
    }

    #[test]
    fn test_accessors() {
        let err = Error::CircuitBreakerOpen { wait: Duration::from_secs(7) };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.status(), None);

        let err = Error::Server { status: 503, body: String::new() };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.retry_after(), None);
    }
}
