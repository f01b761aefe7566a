//! Error types for viewtrace-core

use thiserror::Error;

/// Main error type for the viewtrace-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (connection refused, reset, aborted request)
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// No response arrived within the request timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Collector answered with a non-2xx status
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Every attempt failed with a transient error
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// Async runtime error (no runtime available, task failure)
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether the failure is transient and the request may be retried.
    ///
    /// Timeouts, transport errors and 5xx responses are transient; every
    /// other status is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout(_) => true,
            Error::Status { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

/// Result type alias for viewtrace-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(Error::Status {
            status: 500,
            body: "internal error".to_string()
        }
        .is_retryable());
        assert!(Error::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(Error::Timeout(15000).is_retryable());
        assert!(Error::Transport("connection reset".to_string()).is_retryable());

        assert!(!Error::Status {
            status: 400,
            body: "bad request".to_string()
        }
        .is_retryable());
        assert!(!Error::Status {
            status: 401,
            body: "unauthorized".to_string()
        }
        .is_retryable());
        assert!(!Error::Config("missing endpoint".to_string()).is_retryable());
        assert!(!Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(Error::Timeout(15000)),
        }
        .is_retryable());
    }

    #[test]
    fn test_status_message() {
        let err = Error::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error (502): bad gateway");
    }
}
