//! Error types for batch dispatch.
//!
//! Two levels:
//!
//! - [`DispatchError`] stops the whole batch (pre-flight, output files).
//! - [`AttemptError`] describes one failed request for one configuration
//!   and never leaves that configuration's result.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Whole-batch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The batch was empty.
    #[error("no configurations to dispatch")]
    NoConfigurations,

    /// The endpoint never became reachable within the pre-flight bound.
    #[error("backtesting endpoint {endpoint} unreachable after {waited_secs}s: {last_error}")]
    EndpointUnreachable {
        /// Endpoint that was probed.
        endpoint: String,
        /// Seconds spent waiting.
        waited_secs: u64,
        /// Last probe failure.
        last_error: String,
    },

    /// Cancelled before any configuration was dispatched.
    #[error("batch cancelled before dispatch started")]
    CancelledBeforeStart,

    /// Existing summary file has different columns.
    #[error("summary '{}' has an incompatible header; expected '{expected}', found '{found}'", .path.display())]
    SummaryHeaderMismatch {
        /// Summary file.
        path: PathBuf,
        /// Header this version writes.
        expected: String,
        /// Header found in the file.
        found: String,
    },

    /// Filesystem error on an output file.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Record batch or CSV encoding failed.
    #[error("summary encoding error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl DispatchError {
    /// Wrap an I/O error with the path it concerns.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Classification recorded in the summary's `error_kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/timeout/5xx after the retry ceiling.
    Transient,
    /// Logical failure reported by the endpoint; not retried.
    Domain,
    /// Abandoned or never started because the batch was cancelled.
    Cancelled,
    /// The task running the configuration panicked.
    Internal,
}

impl ErrorKind {
    /// Column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Domain => "domain",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

/// Failure of a single request attempt.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// No response within the request timeout.
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Retryable HTTP status (408, 429, 5xx).
    #[error("HTTP {status}: {message}")]
    Server {
        /// Status code.
        status: u16,
        /// Body excerpt or error field.
        message: String,
        /// Server-provided delay hint.
        retry_after: Option<Duration>,
    },

    /// Non-retryable HTTP status.
    #[error("HTTP {status}: {message}")]
    Rejected {
        /// Status code.
        status: u16,
        /// Error field from the body, or a body excerpt.
        message: String,
        /// Parsed body, when it was JSON.
        body: Option<Value>,
    },

    /// Successful status whose body signals a logical failure.
    #[error("{message}")]
    Domain {
        /// The body's `error` field.
        message: String,
        /// Full response body.
        body: Value,
    },

    /// Successful status whose body is not JSON.
    #[error("non-json response")]
    NonJson {
        /// Leading excerpt of the body.
        excerpt: String,
    },
}

impl AttemptError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Server { .. })
    }

    /// Summary classification of this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::Transient
        } else {
            ErrorKind::Domain
        }
    }

    /// Server delay hint, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Server { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// JSON stored as the detail packet for a final failure.
    #[must_use]
    pub fn detail_packet(&self, attempts: u32) -> Value {
        match self {
            Self::Domain { body, .. } => body.clone(),
            Self::Rejected {
                body: Some(body), ..
            } => body.clone(),
            Self::NonJson { excerpt } => serde_json::json!({
                "error": self.to_string(),
                "raw": excerpt,
                "attempts": attempts,
            }),
            _ => serde_json::json!({
                "error": self.to_string(),
                "attempts": attempts,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AttemptError::Network("connection refused".into()).is_transient());
        assert!(AttemptError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(
            AttemptError::Server {
                status: 503,
                message: "unavailable".into(),
                retry_after: None
            }
            .is_transient()
        );
        assert!(
            !AttemptError::Domain {
                message: "no candles".into(),
                body: json!({"error": "no candles"})
            }
            .is_transient()
        );
        assert_eq!(AttemptError::NonJson { excerpt: String::new() }.kind(), ErrorKind::Domain);
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            AttemptError::Timeout(Duration::from_secs(1200)).to_string(),
            "request timed out after 1200s"
        );
    }

    #[test]
    fn test_detail_packet_keeps_domain_body() {
        let body = json!({"error": "Insufficient data", "results": null});
        let err = AttemptError::Domain {
            message: "Insufficient data".into(),
            body: body.clone(),
        };
        assert_eq!(err.detail_packet(1), body);

        let packet = AttemptError::Timeout(Duration::from_secs(3)).detail_packet(3);
        assert_eq!(packet["attempts"], json!(3));
        assert_eq!(packet["error"], json!("request timed out after 3s"));
    }
}
