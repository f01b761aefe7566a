//! Retrying HTTP client for the remote collector
//!
//! [`RetryingClient`] wraps a [`Transport`] with a per-attempt timeout and
//! exponential backoff. Timeouts, transport errors and 5xx responses are
//! retried; any other non-2xx status fails immediately.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::config::{CollectorConfig, RetryPolicy};
use crate::error::{Error, Result};

/// Raw response from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>>;

/// Wire used to POST a JSON body
pub trait Transport: Send + Sync {
    fn post_json<'a>(&'a self, url: &'a str, body: &'a str) -> TransportFuture<'a>;
}

/// Transport over reqwest
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Build the HTTP client with JSON and optional bearer headers.
    ///
    /// No client-level timeout is set; [`RetryingClient`] owns timeouts.
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

impl Transport for HttpTransport {
    fn post_json<'a>(&'a self, url: &'a str, body: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self
                .http_client
                .post(url)
                .body(body.to_string())
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Transport(format!("failed to read response: {}", e)))?;
            Ok(TransportResponse { status, body })
        })
    }
}

/// Transport that records every request and answers with a scripted status.
///
/// Used for dry runs and tests.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<(String, String)>>,
    script: Mutex<Vec<u16>>,
    fallback_status: u16,
    latency: Duration,
}

impl RecordingTransport {
    /// Accept every request with 200
    pub fn accepting() -> Self {
        Self::with_status(200)
    }

    /// Answer every request with `status`
    pub fn with_status(status: u16) -> Self {
        Self {
            fallback_status: status,
            ..Default::default()
        }
    }

    /// Answer with `statuses` in order, then with `fallback`
    pub fn scripted(statuses: Vec<u16>, fallback: u16) -> Self {
        Self {
            script: Mutex::new(statuses.into_iter().rev().collect()),
            fallback_status: fallback,
            ..Default::default()
        }
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request bodies parsed as JSON
    pub fn bodies(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter_map(|(_, body)| serde_json::from_str(&body).ok())
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for RecordingTransport {
    fn post_json<'a>(&'a self, url: &'a str, body: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((url.to_string(), body.to_string()));

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let status = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop()
                .unwrap_or(self.fallback_status);
            Ok(TransportResponse::new(status, "{}"))
        })
    }
}

/// Timeout, retry and backoff around a transport
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Delay before retry number `attempt` (0 for the first retry)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.policy.backoff_base.saturating_mul(factor)
    }

    /// POST `body` to `url`, returning the parsed response body.
    ///
    /// An empty body parses as `null`; a non-JSON body is returned as a
    /// string value.
    pub async fn post_json(&self, url: &str, body: &str) -> Result<Value> {
        let mut attempt = 0;

        loop {
            match self.attempt(url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient delivery failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, url: &str, body: &str) -> Result<Value> {
        let timeout_ms = self.policy.timeout.as_millis() as u64;
        let response = tokio::time::timeout(self.policy.timeout, self.transport.post_json(url, body))
            .await
            .map_err(|_| Error::Timeout(timeout_ms))??;

        if !response.is_success() {
            return Err(Error::Status {
                status: response.status,
                body: response.body,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&response.body).unwrap_or(Value::String(response.body)))
    }
}
