//! Structured errors for the image proxy.
//!
//! Every error renders as JSON `{error, code}` with a matching HTTP status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use pagewire_client::FetchError;
use pagewire_client::fetch::{SsrfError, UrlError};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing or malformed query parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    #[error("INVALID_URL: {0}")]
    InvalidUrl(#[from] UrlError),

    /// Target refused by the SSRF guard.
    #[error("BLOCKED: {0}")]
    Blocked(#[from] SsrfError),

    /// The image host could not deliver the image.
    #[error("UPSTREAM_FAILED: {0}")]
    Upstream(FetchError),
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl(e) => ProxyError::InvalidUrl(e),
            FetchError::Blocked(e) => ProxyError::Blocked(e),
            other => ProxyError::Upstream(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

fn upstream_status(err: &FetchError) -> (StatusCode, &'static str) {
    match err {
        FetchError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
        FetchError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "UPSTREAM_TOO_LARGE"),
        FetchError::Http { status: 404 } => (StatusCode::NOT_FOUND, "UPSTREAM_NOT_FOUND"),
        FetchError::RetriesExhausted { last, .. } => upstream_status(last),
        _ => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED"),
    }
}

impl ProxyError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ProxyError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            ProxyError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "INVALID_URL"),
            ProxyError::Blocked(_) => (StatusCode::FORBIDDEN, "BLOCKED"),
            ProxyError::Upstream(e) => upstream_status(e),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(code, error = %self, "image proxy request failed");
        } else {
            tracing::debug!(code, error = %self, "image proxy request rejected");
        }
        (status, Json(ErrorBody { error: self.to_string(), code })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_route_to_variants() {
        let err: ProxyError = FetchError::InvalidUrl(UrlError::Empty).into();
        assert_eq!(err.status_and_code(), (StatusCode::BAD_REQUEST, "INVALID_URL"));

        let err: ProxyError = FetchError::Blocked(SsrfError::BlockedScheme("ftp".into())).into();
        assert_eq!(err.status_and_code(), (StatusCode::FORBIDDEN, "BLOCKED"));
    }

    #[test]
    fn test_upstream_status_looks_through_retries() {
        let err = ProxyError::Upstream(FetchError::RetriesExhausted {
            url: "https://cdn.example.com/1.jpg".into(),
            attempts: 2,
            last: Box::new(FetchError::Timeout),
        });
        assert_eq!(err.status_and_code(), (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"));

        let err = ProxyError::Upstream(FetchError::Http { status: 503 });
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED"));
    }
}
