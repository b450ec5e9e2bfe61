//! URL canonicalization and proxy URL construction.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize an image URL before fetching it.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing (protocol-relative `//host` too)
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact; signed CDN URLs depend on it
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        parsed
            .set_host(Some(&lowered))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

/// Build the proxy endpoint URL for an image.
///
/// `base` is where the proxy is mounted, e.g. `http://127.0.0.1:8787` or
/// `https://example.net/api`. The endpoint path is appended to its path.
pub fn proxy_image_url(base: &str, image_url: &str, width: u32, quality: u8) -> Result<url::Url, UrlError> {
    let mut url = url::Url::parse(base).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(UrlError::InvalidUrl(format!("{base} cannot be a base URL")));
    }
    let path = format!("{}/image-proxy", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("url", image_url)
        .append_pair("w", &width.to_string())
        .append_pair("q", &quality.to_string());
    Ok(url)
}
