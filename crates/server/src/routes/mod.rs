//! HTTP routes.
//!
//! - `GET /image-proxy?url=&w=&q=` serves an image through the dedup cache
//! - `GET /image-proxy/stats` reports cache statistics
//! - `DELETE /image-proxy/cache` clears the cache
//! - `GET /health` reports liveness and the shared backend in use

pub mod admin;
pub mod image;

use axum::Router;
use axum::routing::{delete, get};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/image-proxy", get(image::image_proxy))
        .route("/image-proxy/stats", get(admin::stats))
        .route("/image-proxy/cache", delete(admin::clear_cache))
        .route("/health", get(admin::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
