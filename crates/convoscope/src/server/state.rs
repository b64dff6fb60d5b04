//! Application state for the HTTP server

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::Analyzer;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::service::AnalysisService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: AppConfig,
    /// Job subsystem
    service: AnalysisService,
}

impl AppState {
    /// Create the upload directory and start the analysis service
    pub fn new(config: AppConfig, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.upload_dir).map_err(|e| {
            Error::Config(format!(
                "Failed to create upload dir {}: {}",
                config.storage.upload_dir.display(),
                e
            ))
        })?;

        let service = AnalysisService::create(&config, analyzer)?;
        tracing::info!(upload_dir = %config.storage.upload_dir.display(), "Application state ready");

        Ok(Self {
            inner: Arc::new(AppStateInner { config, service }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get the analysis service
    pub fn service(&self) -> &AnalysisService {
        &self.inner.service
    }

    pub fn upload_dir(&self) -> &Path {
        &self.inner.config.storage.upload_dir
    }

    /// Location of an uploaded file by its id
    pub fn upload_path(&self, file_id: &str) -> PathBuf {
        self.upload_dir().join(file_id)
    }
}
