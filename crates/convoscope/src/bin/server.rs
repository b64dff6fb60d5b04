//! Analysis server binary
//!
//! Run with: cargo run -p convoscope --bin convoscope-server

use convoscope::{config::AppConfig, server::AnalysisServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoscope=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var_os("CONVOSCOPE_CONFIG").map(PathBuf::from);
    let mut config = AppConfig::load(config_path.as_deref())?;
    config.apply_overrides(
        std::env::var("CONVOSCOPE_HOST").ok(),
        std::env::var("CONVOSCOPE_PORT").ok(),
    )?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Workers: {}", config.jobs.worker_count);
    tracing::info!("  - Job timeout: {}s", config.jobs.job_timeout_secs);
    tracing::info!("  - Upload dir: {}", config.storage.upload_dir.display());
    tracing::info!(
        "  - Cache dir: {} (max {} bytes)",
        config.storage.cache_dir.display(),
        config.cache.max_size_bytes
    );

    // Create and start server
    let server = AnalysisServer::with_default_analyzer(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}/api", server.address());
    println!("  Health: http://{}/api/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/upload              - Upload an export");
    println!("  POST /api/analysis            - Start an analysis");
    println!("  GET  /api/analysis/:id        - Job status and result");
    println!("  GET  /api/analysis/:id/events - Live progress (SSE)");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
