//! Pooled HTTP fetcher with retry classification and SSRF protection.
//!
//! ### Connection pooling
//! - One `reqwest::Client` is shared by every request, keeping idle
//!   keep-alive connections per host (`max_idle_sockets`).
//! - A semaphore caps requests in flight (`max_sockets`) independently of
//!   how many logical callers sit above the fetcher.
//!
//! ### Retry
//! - Timeouts, connect/DNS failures and HTTP 403/429/502/503/504 are retried.
//! - The delay before attempt `n + 1` is `retry_base * 2^(n - 1)`.
//! - Other HTTP errors are returned at once without spending retry budget.
//!
//! ### Profiles
//! - General fetches: 5MB ceiling, 20s timeout, 3 attempts.
//! - Image fetches: 20MB ceiling, 30s timeout, 2 attempts, binary accept.

pub mod error;
pub mod ssrf;
pub mod url;

use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub use error::FetchError;
pub use ssrf::{SsrfError, check_url, validate_ip};
pub use url::{UrlError, canonicalize, proxy_image_url};

use pagewire_core::AppConfig;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const GENERAL_ACCEPT: &str = "*/*";

/// Per-request limits for one class of fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProfile {
    /// Maximum response body size in bytes
    pub max_bytes: usize,
    /// Request timeout, covering connect and body read
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_retries: u32,
    pub accept: &'static str,
}

impl FetchProfile {
    pub fn general(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            accept: GENERAL_ACCEPT,
        }
    }

    pub fn image(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.image_max_bytes,
            timeout: config.image_timeout(),
            max_retries: config.image_max_retries,
            accept: IMAGE_ACCEPT,
        }
    }

    /// Same profile with a different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { timeout, ..self.clone() }
    }
}

/// Configuration for the pooled fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Requests allowed in flight at once
    pub max_sockets: usize,
    /// Idle keep-alive connections retained per host
    pub max_idle_sockets: usize,
    /// First backoff delay; doubles per attempt
    pub retry_base: Duration,
    /// Refuse private and reserved targets
    pub block_private: bool,
    pub general: FetchProfile,
    pub image: FetchProfile,
}

impl From<&AppConfig> for FetcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_sockets: config.max_sockets,
            max_idle_sockets: config.max_idle_sockets,
            retry_base: config.retry_base(),
            block_private: config.block_private_addresses,
            general: FetchProfile::general(config),
            image: FetchProfile::image(config),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL requested, after canonicalization
    pub url: Url,
    /// The final URL after redirects
    pub final_url: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    /// Time taken by the successful attempt in milliseconds
    pub fetch_ms: u64,
}

/// HTTP client sharing a bounded connection pool across all callers.
#[derive(Debug, Clone)]
pub struct PooledFetcher {
    http: Client,
    sockets: Arc<Semaphore>,
    config: Arc<FetcherConfig>,
}

impl PooledFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(config.max_idle_sockets)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        let sockets = Arc::new(Semaphore::new(config.max_sockets.max(1)));
        Ok(Self { http, sockets, config: Arc::new(config) })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Self::new(FetcherConfig::from(config))
    }

    /// A handle on the same connection pool and socket budget with the
    /// private address guard set to `block_private`.
    pub fn with_block_private(&self, block_private: bool) -> Self {
        let config = FetcherConfig { block_private, ..(*self.config).clone() };
        Self { http: self.http.clone(), sockets: Arc::clone(&self.sockets), config: Arc::new(config) }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Requests currently holding a socket slot.
    pub fn in_flight(&self) -> usize {
        self.config.max_sockets.max(1) - self.sockets.available_permits()
    }

    /// Fetch with the general profile.
    pub async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let profile = self.config.general.clone();
        self.fetch_with_retry(url, &profile, profile.max_retries).await
    }

    /// Fetch with the image profile.
    pub async fn fetch_image(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let profile = self.config.image.clone();
        self.fetch_with_retry(url, &profile, profile.max_retries).await
    }

    /// Fetch `url`, retrying transient failures with exponential backoff.
    ///
    /// `max_retries` is the total attempt ceiling; 0 is treated as 1.
    /// Exhausting it on retryable failures yields
    /// [`FetchError::RetriesExhausted`] naming the URL and attempt count.
    pub async fn fetch_with_retry(
        &self, url: &str, profile: &FetchProfile, max_retries: u32,
    ) -> Result<FetchResponse, FetchError> {
        let url = canonicalize(url)?;
        let ceiling = max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_once(&url, profile).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < ceiling => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable fetch failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Delay to wait after the given failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.config.retry_base.saturating_mul(factor)
    }

    /// One request, no retries.
    pub async fn fetch_once(&self, url: &Url, profile: &FetchProfile) -> Result<FetchResponse, FetchError> {
        if self.config.block_private {
            check_url(url).await?;
        }

        let _permit = self
            .sockets
            .acquire()
            .await
            .map_err(|_| FetchError::Connect("connection pool closed".into()))?;

        let start = Instant::now();
        let response = self
            .http
            .get(url.as_str())
            .timeout(profile.timeout)
            .header(header::ACCEPT, profile.accept)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16() });
        }

        if let Some(len) = response.content_length()
            && len as usize > profile.max_bytes
        {
            return Err(FetchError::TooLarge { size: len, limit: profile.max_bytes });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await?;
        if bytes.len() > profile.max_bytes {
            return Err(FetchError::TooLarge { size: bytes.len() as u64, limit: profile.max_bytes });
        }
        if bytes.is_empty() {
            return Err(FetchError::EmptyPayload);
        }

        let fetch_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(url = %url, final_url = %final_url, fetch_ms, bytes = bytes.len(), "fetched");

        Ok(FetchResponse { url: url.clone(), final_url, status, content_type, bytes, fetch_ms })
    }
}
