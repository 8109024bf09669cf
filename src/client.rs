//! HTTP transport for delivering formatted requests.
//!
//! A thin wrapper around a pooled reqwest client plus the outcome
//! classification the delivery worker's retry loop acts on. The transport
//! performs exactly one network call per invocation; retry policy lives in
//! the worker.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::format::FormattedRequest;

/// Marker the endpoint includes in the body of an accepted report.
const SUCCESS_MARKER: &str = "ok";

/// Longest response-body excerpt carried into a log line.
const BODY_EXCERPT_LEN: usize = 120;

/// Raw result of one network call: status line plus body text.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Errors from the transport layer, before any HTTP status exists.
#[derive(Debug)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    Timeout,

    /// Connection-level failure
    Network(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "Request timed out"),
            TransportError::Network(e) => write!(f, "Network error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// How the worker should treat the result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the report
    Success,

    /// Transient failure; retrying may help
    Retry(String),

    /// Permanent failure for this record; further attempts are pointless
    Fatal(String),
}

/// Classify one attempt's result.
///
/// Transport errors and 5xx-class statuses (plus 429) are worth retrying.
/// Any other non-2xx status means the request itself is unacceptable, as
/// does a 2xx response whose body lacks the endpoint's success marker.
pub fn classify(result: &Result<TransportResponse, TransportError>) -> DeliveryOutcome {
    match result {
        Err(TransportError::Timeout) => DeliveryOutcome::Retry("request timed out".to_string()),
        Err(TransportError::Network(e)) => DeliveryOutcome::Retry(e.clone()),
        Ok(response) if response.status.is_success() => {
            if response.body.contains(SUCCESS_MARKER) {
                DeliveryOutcome::Success
            } else {
                DeliveryOutcome::Fatal(format!(
                    "unexpected response body: {}",
                    excerpt(&response.body)
                ))
            }
        }
        Ok(response)
            if response.status.is_server_error()
                || response.status == StatusCode::TOO_MANY_REQUESTS =>
        {
            DeliveryOutcome::Retry(format!("server error ({})", response.status))
        }
        Ok(response) => DeliveryOutcome::Fatal(format!(
            "rejected ({}): {}",
            response.status,
            excerpt(&response.body)
        )),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_EXCERPT_LEN {
        trimmed.to_string()
    } else {
        let mut end = BODY_EXCERPT_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}

/// HTTP transport backed by a pooled reqwest client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { client })
    }

    /// Perform one GET against the formatted URL.
    pub async fn fetch(
        &self,
        request: &FormattedRequest,
    ) -> Result<TransportResponse, TransportError> {
        debug!(url = %request, "Sending report");

        let response = self.client.get(request.url().clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
