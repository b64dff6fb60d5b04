//! Health and cache administration endpoints

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::CacheStats;
use crate::error::Result;
use crate::server::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the service started
    pub uptime: u64,
    /// Pending plus processing jobs
    pub active_jobs: usize,
    /// Bytes held by the result cache
    pub cache_size: u64,
}

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let service = state.service();
    let cache_size = service.cache().blocking(|cache| cache.total_size()).await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime: service.uptime().as_secs(),
        active_jobs: service.stats().active(),
        cache_size,
    }))
}

/// GET /api/cache
pub async fn cache_stats(State(state): State<AppState>) -> Result<Json<CacheStats>> {
    let stats = state.service().cache().blocking(|cache| cache.stats()).await?;
    Ok(Json(stats))
}

/// DELETE /api/cache
pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<Value>> {
    let removed = state
        .service()
        .cache()
        .blocking(|cache| {
            let removed = cache.len();
            cache.clear();
            removed
        })
        .await?;
    tracing::info!(removed, "Cache cleared");
    Ok(Json(json!({ "message": "Cache cleared", "removed": removed })))
}
