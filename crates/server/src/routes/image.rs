//! The image proxy endpoint.
//!
//! Lookups go through the dedup cache keyed by the source URL's content
//! identity, so `?sig=` variants of one image share a single entry. On a
//! miss the original is fetched, optionally transformed, and recorded.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;

use pagewire_client::FetchResponse;
use pagewire_client::fetch::canonicalize;
use pagewire_core::{EntryMetadata, derive_cache_key};

use crate::error::ProxyError;
use crate::state::AppState;
use crate::transform::format_from_content_type;

const MAX_WIDTH: u32 = 4096;

static X_CACHE: HeaderName = HeaderName::from_static("x-cache");
static X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
    pub w: Option<u32>,
    pub q: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

fn image_response(state: &AppState, key: &str, status: CacheStatus, body: Bytes, content_type: Option<String>) -> Response {
    let headers = [
        (header::CONTENT_TYPE, content_type.unwrap_or_else(|| "application/octet-stream".to_string())),
        (header::CACHE_CONTROL, format!("public, max-age={}, immutable", state.cache_ttl().as_secs())),
        (X_CACHE.clone(), status.as_str().to_string()),
        (X_CACHE_KEY.clone(), key.to_string()),
    ];
    (headers, body).into_response()
}

/// Fetch a cached rendition through whichever client produced it.
async fn fetch_rendition(
    state: &AppState, original_url: &str, optimized_url: &str,
) -> Result<FetchResponse, pagewire_client::FetchError> {
    match &state.transformer {
        Some(transformer) if optimized_url != original_url => transformer.fetch(optimized_url).await,
        _ => state.fetcher.fetch_image(optimized_url).await,
    }
}

pub async fn image_proxy(
    State(state): State<AppState>, query: Result<Query<ImageQuery>, QueryRejection>,
) -> Result<Response, ProxyError> {
    let Query(query) = query.map_err(|e| ProxyError::InvalidInput(e.body_text()))?;

    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ProxyError::InvalidInput("missing url parameter".into()))?;
    let width = query.w.unwrap_or(state.default_width);
    let quality = query.q.unwrap_or(state.default_quality);

    if width == 0 || width > MAX_WIDTH {
        return Err(ProxyError::InvalidInput(format!("w must be between 1 and {MAX_WIDTH}")));
    }
    if !(1..=100).contains(&quality) {
        return Err(ProxyError::InvalidInput("q must be between 1 and 100".into()));
    }
    canonicalize(&url)?;

    let key = derive_cache_key(&url);

    if let Some(entry) = state.cache.get(&url).await {
        match fetch_rendition(&state, &entry.original_url, &entry.optimized_url).await {
            Ok(rendition) => {
                tracing::debug!(key = %key, url = %url, "image proxy hit");
                return Ok(image_response(&state, &key, CacheStatus::Hit, rendition.bytes, rendition.content_type));
            }
            Err(e) => {
                tracing::warn!(key = %key, optimized = %entry.optimized_url, error = %e, "cached rendition unavailable, refetching");
            }
        }
    }

    let original = state.fetcher.fetch_image(&url).await?;
    let original_size = original.bytes.len() as u64;

    let Some(transformer) = &state.transformer else {
        let metadata = EntryMetadata {
            format: format_from_content_type(original.content_type.as_deref()),
            original_size_bytes: original_size,
            optimized_size_bytes: original_size,
        };
        state.cache.set(&url, &url, metadata).await;
        return Ok(image_response(&state, &key, CacheStatus::Miss, original.bytes, original.content_type));
    };

    let optimized_url = transformer.optimized_url(&url, width, quality);
    match transformer.fetch(&optimized_url).await {
        Ok(optimized) => {
            let metadata = EntryMetadata {
                format: format_from_content_type(optimized.content_type.as_deref()),
                original_size_bytes: original_size,
                optimized_size_bytes: optimized.bytes.len() as u64,
            };
            let entry = state.cache.set(&url, &optimized_url, metadata).await;
            tracing::info!(
                key = %key,
                original = entry.original_size_bytes,
                optimized = entry.optimized_size_bytes,
                format = %entry.format,
                "image optimized"
            );
            Ok(image_response(&state, &key, CacheStatus::Miss, optimized.bytes, optimized.content_type))
        }
        Err(e) => {
            tracing::warn!(key = %key, url = %url, error = %e, "transformation failed, serving original");
            Ok(image_response(&state, &key, CacheStatus::Bypass, original.bytes, original.content_type))
        }
    }
}
