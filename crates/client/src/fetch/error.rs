//! Fetch error types and retry classification.

use std::sync::Arc;

use super::ssrf::SsrfError;
use super::url::UrlError;

/// Errors from the pooled fetcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The request did not complete within its timeout.
    #[error("request timeout")]
    Timeout,

    /// Connection refused, reset, or DNS resolution failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Upstream answered with a non-success status.
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// Upstream answered 2xx with a zero-byte body.
    #[error("empty payload")]
    EmptyPayload,

    /// Response body exceeds the profile's ceiling.
    #[error("response too large: {size} bytes exceeds {limit}")]
    TooLarge { size: u64, limit: usize },

    /// Any other transport failure.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    /// Target refused by the SSRF guard.
    #[error("blocked: {0}")]
    Blocked(#[from] SsrfError),

    /// Retry budget spent on retryable failures.
    #[error("fetch failed for {url} after {attempts} attempts: {last}")]
    RetriesExhausted { url: String, attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Whether another attempt may succeed.
    ///
    /// HTTP 403 is treated as transient: image hosts behind anti-scraping
    /// challenges answer 403 intermittently and clear on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Http { status } => matches!(status, 403 | 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Upstream HTTP status, looking through exhausted retries.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status } => Some(*status),
            FetchError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else {
            FetchError::Network(Arc::new(err))
        }
    }
}
