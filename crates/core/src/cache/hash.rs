//! Content-identity cache keys for image URLs.
//!
//! Two URLs that differ only in query string, fragment, scheme, or letter
//! case point at the same logical image and collapse to one key.

use sha2::{Digest, Sha256};
use url::Url;

/// Width of a cache key in hex characters.
pub const CACHE_KEY_LEN: usize = 16;

/// Normalize an image URL into the form that gets hashed.
///
/// Query and fragment are dropped, the remainder is lower-cased and the
/// scheme is stripped. Input that does not parse as a URL is only
/// lower-cased.
pub fn normalize_image_url(input: &str) -> String {
    match Url::parse(input) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            let lowered = url.as_str().to_lowercase();
            match lowered.split_once("://") {
                Some((_, rest)) => rest.to_string(),
                None => lowered
                    .split_once(':')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or(lowered),
            }
        }
        Err(_) => input.to_lowercase(),
    }
}

/// Derive the dedup cache key for an image URL.
///
/// Pure and infallible: the key is the first [`CACHE_KEY_LEN`] hex
/// characters of the SHA-256 of [`normalize_image_url`].
pub fn derive_cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_image_url(url).as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(CACHE_KEY_LEN);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = derive_cache_key("https://cdn.example.com/manga/1/001.jpg");
        let hash2 = derive_cache_key("https://cdn.example.com/manga/1/001.jpg");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_query_and_fragment_ignored() {
        let base = derive_cache_key("https://cdn.example.com/manga/1/001.jpg");
        assert_eq!(base, derive_cache_key("https://cdn.example.com/manga/1/001.jpg?token=abc&exp=99"));
        assert_eq!(base, derive_cache_key("https://cdn.example.com/manga/1/001.jpg#page"));
        assert_eq!(base, derive_cache_key("https://cdn.example.com/manga/1/001.jpg?v=2#top"));
    }

    #[test]
    fn test_scheme_and_case_ignored() {
        let base = derive_cache_key("https://cdn.example.com/Manga/1/001.JPG");
        assert_eq!(base, derive_cache_key("http://CDN.example.com/manga/1/001.jpg"));
    }

    #[test]
    fn test_different_paths_differ() {
        let a = derive_cache_key("https://cdn.example.com/manga/1/001.jpg");
        let b = derive_cache_key("https://cdn.example.com/manga/1/002.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let hash = derive_cache_key("https://example.com/a.png");
        assert_eq!(hash.len(), CACHE_KEY_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unparsable_input_still_hashes() {
        let a = derive_cache_key("not a url at all");
        let b = derive_cache_key("NOT A URL AT ALL");
        assert_eq!(a, b);
        assert_eq!(a.len(), CACHE_KEY_LEN);
    }

    #[test]
    fn test_normalize_strips_scheme() {
        assert_eq!(
            normalize_image_url("HTTPS://Example.com/Path/IMG.png?x=1#f"),
            "example.com/path/img.png"
        );
    }
}
