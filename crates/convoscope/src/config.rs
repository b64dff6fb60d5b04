//! Configuration for the analysis backend

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upload and cache directories
    #[serde(default)]
    pub storage: StorageConfig,
    /// Job queue and worker pool
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Result cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Progress event coalescing
    #[serde(default)]
    pub progress: ProgressConfig,
    /// Result summarization limits
    #[serde(default)]
    pub summary: SummaryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str::<AppConfig>(&content).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => AppConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override the listen address, as read from `CONVOSCOPE_HOST` / `CONVOSCOPE_PORT`
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<String>) -> Result<()> {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("Invalid port '{}'", port)))?;
        }
        Ok(())
    }

    /// Reject settings the job system cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.jobs.worker_count == 0 {
            return Err(Error::Config("jobs.worker_count must be at least 1".to_string()));
        }
        if self.jobs.poll_interval_ms == 0 {
            return Err(Error::Config("jobs.poll_interval_ms must be positive".to_string()));
        }
        if self.jobs.job_timeout_secs == 0 {
            return Err(Error::Config("jobs.job_timeout_secs must be positive".to_string()));
        }
        if self.cache.max_size_bytes == 0 {
            return Err(Error::Config("cache.max_size_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address (localhost only by default, the data is private)
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where uploaded documents are saved
    pub upload_dir: PathBuf,
    /// Where cached results are persisted
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from(".uploads"),
            cache_dir: PathBuf::from(".cache"),
        }
    }
}

/// Job queue and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of concurrent analyses
    pub worker_count: usize,
    /// Upper bound on a single worker wait for the next job
    pub poll_interval_ms: u64,
    /// Maximum job duration (default: 600s = 10 minutes)
    pub job_timeout_secs: u64,
    /// Optional cap on queued jobs; submissions beyond it are rejected
    pub max_queue_depth: Option<usize>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval_ms: 1000,
            job_timeout_secs: 600,
            max_queue_depth: None,
        }
    }
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Size ceiling for all cached results (default: 1GB)
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Progress event coalescing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Smallest percent increase that is published immediately
    pub min_percent_delta: u8,
    /// Minimum spacing of label-only updates
    pub min_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_percent_delta: 1,
            min_interval_ms: 250,
        }
    }
}

impl ProgressConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Limits that keep result payloads predictable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Per-message records kept in a result (first N in processing order)
    pub max_records: usize,
    /// Entries kept in the topic distribution
    pub top_topics: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_records: 1000, // Limit to first 1000 for performance
            top_topics: 10,
        }
    }
}
