//! Analysis service: wires the cache, registry, queue and workers together
//! and exposes the submission/query surface.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::analysis::{AnalysisOptions, Analyzer};
use crate::cache::ContentAddressedCache;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::{EventStream, ProgressBroadcaster};
use crate::processing::{
    AnalysisRunner, JobId, JobQueue, JobRegistry, JobStats, JobView, WorkerPool,
};

/// Owned instance of the job subsystem.
///
/// Created with [`AnalysisService::create`] inside a Tokio runtime and
/// stopped with [`AnalysisService::shutdown`]. Several instances can live
/// in one process.
pub struct AnalysisService {
    registry: Arc<JobRegistry>,
    queue: Arc<JobQueue>,
    cache: Arc<ContentAddressedCache>,
    workers: Mutex<Option<WorkerPool>>,
    started_at: Instant,
}

impl AnalysisService {
    /// Open the cache and start the worker pool
    pub fn create(config: &AppConfig, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ContentAddressedCache::open(
            &config.storage.cache_dir,
            config.cache.max_size_bytes,
        )?);
        let queue = Arc::new(JobQueue::new(config.jobs.max_queue_depth));
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&queue),
            Arc::new(ProgressBroadcaster::new()),
        ));
        let runner = Arc::new(AnalysisRunner::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            analyzer,
            config.progress.clone(),
            config.summary.clone(),
            config.jobs.job_timeout(),
        ));
        let workers = WorkerPool::spawn(
            config.jobs.worker_count,
            Arc::clone(&queue),
            runner,
            config.jobs.poll_interval(),
        );

        tracing::info!(
            workers = workers.size(),
            cache_dir = %config.storage.cache_dir.display(),
            "Analysis service started"
        );

        Ok(Self {
            registry,
            queue,
            cache,
            workers: Mutex::new(Some(workers)),
            started_at: Instant::now(),
        })
    }

    /// Queue a document for analysis
    pub async fn submit(&self, document_ref: impl AsRef<Path>, options: AnalysisOptions) -> Result<JobId> {
        let path = document_ref.as_ref();
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::validation(format!(
                    "Document '{}' is not a file",
                    path.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("Document '{}'", path.display())))
            }
            Err(e) => return Err(e.into()),
        }

        self.registry.create_job(path, options)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobView> {
        self.registry
            .view(job_id)
            .ok_or_else(|| Error::not_found(format!("Job '{}'", job_id)))
    }

    pub fn cancel(&self, job_id: JobId) -> bool {
        self.registry.cancel_job(job_id)
    }

    /// Push stream of a job's events; closes after its terminal event
    pub fn subscribe(&self, job_id: JobId) -> Result<EventStream> {
        self.registry.subscribe(job_id)
    }

    pub fn stats(&self) -> JobStats {
        self.registry.stats()
    }

    pub fn list_jobs(&self) -> Vec<JobView> {
        self.registry.list_jobs()
    }

    pub fn cache(&self) -> &Arc<ContentAddressedCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Stop accepting jobs and wait for the workers.
    ///
    /// Running jobs finish; queued jobs stay pending. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.queue.close();
        let workers = self.workers.lock().await.take();
        if let Some(workers) = workers {
            workers.shutdown().await;
            tracing::info!("Analysis service stopped");
        }
    }
}
