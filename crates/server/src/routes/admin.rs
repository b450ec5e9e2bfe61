use axum::Json;
use axum::extract::State;
use serde::Serialize;

use pagewire_core::CacheStats;

use crate::state::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: u64,
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse { cleared: state.cache.clear().await })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub shared_backend: Option<&'static str>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        shared_backend: state.cache.backend_name(),
    })
}
