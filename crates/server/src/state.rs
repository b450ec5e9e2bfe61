//! Shared state for the proxy handlers.

use std::sync::Arc;
use std::time::Duration;

use pagewire_client::PooledFetcher;
use pagewire_core::{AppConfig, DedupCache};

use crate::transform::TemplateTransformer;

/// Cloned into every handler; all fields are cheap handles.
#[derive(Debug, Clone)]
pub struct AppState {
    pub cache: Arc<DedupCache>,
    /// Upstream image fetcher, guarded against private targets.
    pub fetcher: PooledFetcher,
    /// `None` when the proxy passes images through unmodified.
    pub transformer: Option<TemplateTransformer>,
    pub default_width: u32,
    pub default_quality: u8,
}

impl AppState {
    pub fn from_config(config: &AppConfig, cache: Arc<DedupCache>) -> anyhow::Result<Self> {
        let fetcher = PooledFetcher::from_config(config)?;
        let transformer = TemplateTransformer::from_config(config, &fetcher);
        Ok(Self {
            cache,
            fetcher,
            transformer,
            default_width: config.default_width,
            default_quality: config.default_quality,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }
}
