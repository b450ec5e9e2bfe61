//! Image loaders the priority queue can drain into.

use async_trait::async_trait;
use bytes::Bytes;

use crate::fetch::{FetchError, PooledFetcher, proxy_image_url};

/// Something that turns an image URL into bytes.
#[async_trait]
pub trait ImageLoader: Send + Sync + 'static {
    async fn load(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Loads straight from the image host.
#[async_trait]
impl ImageLoader for PooledFetcher {
    async fn load(&self, url: &str) -> Result<Bytes, FetchError> {
        Ok(self.fetch_image(url).await?.bytes)
    }
}

/// Loads through the image proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxiedLoader {
    fetcher: PooledFetcher,
    base: String,
    width: u32,
    quality: u8,
}

impl ProxiedLoader {
    pub fn new(fetcher: PooledFetcher, base: impl Into<String>, width: u32, quality: u8) -> Self {
        Self { fetcher, base: base.into(), width, quality }
    }
}

#[async_trait]
impl ImageLoader for ProxiedLoader {
    async fn load(&self, url: &str) -> Result<Bytes, FetchError> {
        let proxied = proxy_image_url(&self.base, url, self.width, self.quality)?;
        Ok(self.fetcher.fetch_image(proxied.as_str()).await?.bytes)
    }
}
