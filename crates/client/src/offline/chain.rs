//! Ordered fetch tiers for offline page downloads.

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use crate::fetch::{FetchError, PooledFetcher, proxy_image_url};
use pagewire_core::AppConfig;

/// How a tier reaches the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierKind {
    /// Straight from the image host.
    Direct,
    /// Through the image proxy at `base`.
    Proxied { base: String, width: u32, quality: u8 },
}

/// One named fetch strategy with its own timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTier {
    pub name: &'static str,
    pub timeout: Duration,
    pub attempts: u32,
    pub kind: TierKind,
}

impl FetchTier {
    pub fn direct(timeout: Duration) -> Self {
        Self { name: "direct", timeout, attempts: 1, kind: TierKind::Direct }
    }

    pub fn proxied(base: impl Into<String>, width: u32, quality: u8, timeout: Duration) -> Self {
        Self {
            name: "proxied",
            timeout,
            attempts: 1,
            kind: TierKind::Proxied { base: base.into(), width, quality },
        }
    }
}

/// A page fetched by some tier.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub tier: &'static str,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Every tier failed; one entry per tier, in order.
#[derive(Debug, Clone)]
pub struct ChainError {
    pub failures: Vec<(&'static str, FetchError)>,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no fetch tiers configured");
        }
        for (i, (tier, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{tier}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainError {}

/// Tiers tried in sequence, stopping at the first success.
#[derive(Debug, Clone)]
pub struct FetchChain {
    fetcher: PooledFetcher,
    tiers: Vec<FetchTier>,
}

impl FetchChain {
    pub fn new(fetcher: PooledFetcher, tiers: Vec<FetchTier>) -> Self {
        Self { fetcher, tiers }
    }

    /// Direct with the short timeout, then through the configured proxy.
    pub fn standard(fetcher: PooledFetcher, config: &AppConfig) -> Self {
        let tiers = vec![
            FetchTier::direct(config.direct_timeout()),
            FetchTier::proxied(
                config.proxy_base_url.clone(),
                config.default_width,
                config.default_quality,
                config.proxied_timeout(),
            ),
        ];
        Self::new(fetcher, tiers)
    }

    pub fn tiers(&self) -> &[FetchTier] {
        &self.tiers
    }

    pub async fn fetch(&self, url: &str) -> Result<Fetched, ChainError> {
        let mut failures = Vec::new();

        for tier in &self.tiers {
            match self.fetch_tier(tier, url).await {
                Ok(fetched) => {
                    if !failures.is_empty() {
                        tracing::debug!(url, tier = tier.name, "fallback tier succeeded");
                    }
                    return Ok(fetched);
                }
                Err(err) => {
                    tracing::debug!(url, tier = tier.name, error = %err, "fetch tier failed");
                    failures.push((tier.name, err));
                }
            }
        }

        Err(ChainError { failures })
    }

    async fn fetch_tier(&self, tier: &FetchTier, url: &str) -> Result<Fetched, FetchError> {
        let target = match &tier.kind {
            TierKind::Direct => url.to_string(),
            TierKind::Proxied { base, width, quality } => proxy_image_url(base, url, *width, *quality)?.to_string(),
        };

        let profile = self.fetcher.config().image.with_timeout(tier.timeout);
        let response = self.fetcher.fetch_with_retry(&target, &profile, tier.attempts).await?;

        Ok(Fetched { tier: tier.name, bytes: response.bytes, content_type: response.content_type })
    }
}
