//! Backtesting Port (Driven Port)
//!
//! Interface to the external backtesting capability, plus the HTTP adapter
//! that talks to a backtesting API over JSON with basic auth.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use super::error::{AttemptError, DispatchError};
use super::retry::{RetryAfterExtractor, is_retryable_status};
use super::sanitize::parse_lenient;
use crate::config::{Credentials, EndpointConfig};

/// Longest body excerpt kept for diagnostics.
pub const BODY_EXCERPT_CHARS: usize = 400;

/// Port for running one backtest.
///
/// Implementations perform a single attempt; retry, cancellation and
/// domain-error detection live in the dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BacktestPort: Send + Sync {
    /// Check the endpoint accepts connections.
    async fn probe(&self) -> Result<(), AttemptError>;

    /// Run one backtest. `Ok` carries the parsed body of a 2xx response.
    async fn run_backtest(&self, body: &Value) -> Result<Value, AttemptError>;

    /// Human-readable endpoint description for logs and errors.
    fn endpoint(&self) -> String;
}

/// First `BODY_EXCERPT_CHARS` characters of a body.
#[must_use]
pub fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_CHARS).collect()
}

/// Backtesting API client over reqwest.
pub struct HttpBacktestClient {
    client: Client,
    url: Url,
    credentials: Credentials,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl fmt::Debug for HttpBacktestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBacktestClient")
            .field("url", &self.url.as_str())
            .field("credentials", &self.credentials)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpBacktestClient {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the client cannot be built.
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, DispatchError> {
        let url = endpoint
            .url()
            .map_err(|e| DispatchError::Client(format!("invalid endpoint URL: {e}")))?;
        let request_timeout = Duration::from_secs(endpoint.request_timeout_secs);
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url,
            credentials: endpoint.credentials.clone(),
            request_timeout,
            probe_timeout: Duration::from_secs(2),
        })
    }

    fn socket_address(&self) -> Result<String, AttemptError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| AttemptError::Network(format!("no host in {}", self.url)))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| AttemptError::Network(format!("no port for {}", self.url)))?;
        Ok(format!("{host}:{port}"))
    }
}

/// Error message carried by a JSON body, if any.
fn body_error_message(body: &Value) -> Option<String> {
    ["error", "detail", "message"].iter().find_map(|key| match body.get(*key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    })
}

/// Classify a response by status and body.
pub(crate) fn classify_response(
    status: StatusCode,
    retry_after: Option<Duration>,
    text: &str,
) -> Result<Value, AttemptError> {
    if status.is_success() {
        return parse_lenient(text).map_err(|_| AttemptError::NonJson {
            excerpt: excerpt(text),
        });
    }

    let parsed = parse_lenient(text).ok();
    let message = parsed
        .as_ref()
        .and_then(body_error_message)
        .unwrap_or_else(|| excerpt(text.trim()));
    let code = status.as_u16();

    if is_retryable_status(code) {
        Err(AttemptError::Server {
            status: code,
            message,
            retry_after,
        })
    } else {
        Err(AttemptError::Rejected {
            status: code,
            message,
            body: parsed,
        })
    }
}

#[async_trait]
impl BacktestPort for HttpBacktestClient {
    async fn probe(&self) -> Result<(), AttemptError> {
        let address = self.socket_address()?;
        match tokio::time::timeout(self.probe_timeout, tokio::net::TcpStream::connect(&address))
            .await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(AttemptError::Network(format!("{address}: {e}"))),
            Err(_) => Err(AttemptError::Timeout(self.probe_timeout)),
        }
    }

    async fn run_backtest(&self, body: &Value) -> Result<Value, AttemptError> {
        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Timeout(self.request_timeout)
                } else {
                    AttemptError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(RetryAfterExtractor::parse);

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Timeout(self.request_timeout)
            } else {
                AttemptError::Network(e.to_string())
            }
        })?;

        classify_response(status, retry_after, &text)
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_success_body_is_parsed() {
        let value = classify_response(StatusCode::OK, None, r#"{"results": {"net_pnl": NaN}}"#)
            .unwrap();
        assert_eq!(value["results"]["net_pnl"], json!("NaN"));
    }

    #[test]
    fn test_success_non_json_is_domain_failure() {
        let long = "x".repeat(1000);
        match classify_response(StatusCode::OK, None, &long).unwrap_err() {
            AttemptError::NonJson { excerpt } => assert_eq!(excerpt.len(), BODY_EXCERPT_CHARS),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_server_error_is_transient_with_retry_after() {
        let err = classify_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            r#"{"detail": "slow down"}"#,
        )
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "HTTP 429: slow down");
    }

    #[test]
    fn test_client_error_is_not_retried() {
        let err = classify_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            None,
            r#"{"detail": [{"loc": ["body", "config"], "msg": "field required"}]}"#,
        )
        .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("HTTP 422: [{"));
    }

    #[test]
    fn test_client_debug_redacts_password() {
        let endpoint = EndpointConfig::default();
        let client = HttpBacktestClient::new(&endpoint).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("/run-backtesting"));
        assert!(!debug.contains("password: \"admin\""));
    }
}
