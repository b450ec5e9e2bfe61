//! Adapter for the external image transformation service.
//!
//! The service is addressed by a URL template with `{url}`, `{w}` and `{q}`
//! placeholders. The source URL is percent-encoded before substitution.

use pagewire_client::{FetchError, FetchResponse, PooledFetcher};
use pagewire_core::AppConfig;
use url::form_urlencoded;

/// Builds and fetches optimized renditions.
#[derive(Debug, Clone)]
pub struct TemplateTransformer {
    template: String,
    fetcher: PooledFetcher,
}

impl TemplateTransformer {
    /// Transformer for the configured template, or `None` for passthrough.
    ///
    /// Shares `upstream`'s connection pool and socket budget. The service is
    /// operator-configured, so its handle skips the private address guard.
    pub fn from_config(config: &AppConfig, upstream: &PooledFetcher) -> Option<Self> {
        match config.require_transform_template() {
            Ok(template) => Some(Self::new(template, upstream.with_block_private(false))),
            Err(e) => {
                tracing::info!(reason = %e, "image transformation disabled, proxy will pass images through");
                None
            }
        }
    }

    pub fn new(template: impl Into<String>, fetcher: PooledFetcher) -> Self {
        Self { template: template.into(), fetcher }
    }

    /// URL of the optimized rendition of `url`.
    pub fn optimized_url(&self, url: &str, width: u32, quality: u8) -> String {
        let encoded: String = form_urlencoded::byte_serialize(url.as_bytes()).collect();
        self.template
            .replace("{url}", &encoded)
            .replace("{w}", &width.to_string())
            .replace("{q}", &quality.to_string())
    }

    /// Fetch the rendition built by [`Self::optimized_url`].
    pub async fn fetch(&self, optimized_url: &str) -> Result<FetchResponse, FetchError> {
        self.fetcher.fetch_image(optimized_url).await
    }
}

/// Short format name from a content type, e.g. `image/webp` becomes `webp`.
pub fn format_from_content_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .map(|sub| sub.trim_end_matches("+xml").to_ascii_lowercase())
        .filter(|sub| !sub.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
