//! API routes for the analysis server

pub mod analysis;
pub mod health;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Upload - with larger body limit for exports
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/upload/:file_id", get(upload::get_upload_info))
        // Analysis jobs
        .route(
            "/analysis",
            get(analysis::list_jobs).post(analysis::start_analysis),
        )
        .route(
            "/analysis/:job_id",
            get(analysis::get_analysis).delete(analysis::cancel_analysis),
        )
        .route("/analysis/:job_id/events", get(analysis::job_events))
        // Health and cache
        .route("/health", get(health::health_check))
        .route("/cache", get(health::cache_stats).delete(health::clear_cache))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "convoscope",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Conversation export analysis with background jobs and cached results",
        "endpoints": {
            "POST /api/upload": "Upload a conversation export (multipart field 'file')",
            "GET /api/upload/:file_id": "Metadata of an uploaded export",
            "POST /api/analysis": "Start an analysis job",
            "GET /api/analysis": "List jobs and queue stats",
            "GET /api/analysis/:job_id": "Job status and result",
            "DELETE /api/analysis/:job_id": "Cancel a job",
            "GET /api/analysis/:job_id/events": "Server-sent progress events",
            "GET /api/health": "Health check",
            "GET /api/cache": "Cache statistics",
            "DELETE /api/cache": "Clear cached results"
        }
    }))
}
