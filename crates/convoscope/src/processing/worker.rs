//! Fixed-size pool of background workers

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::job_queue::JobQueue;
use super::runner::AnalysisRunner;

/// N worker loops pulling job ids off the shared queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `worker_count` workers on the current runtime
    pub fn spawn(
        worker_count: usize,
        queue: Arc<JobQueue>,
        runner: Arc<AnalysisRunner>,
        poll_interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&runner),
                    poll_interval,
                    shutdown.clone(),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal all workers and wait for them.
    ///
    /// A worker busy with a job finishes it first; queued jobs stay pending.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<JobQueue>,
    runner: Arc<AnalysisRunner>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.dequeue(poll_interval) => next,
        };

        // Empty poll: go round again so shutdown is noticed
        let Some(job_id) = next else { continue };

        tracing::debug!(worker_id, %job_id, "Dispatching job");
        runner.run(job_id).await;
    }

    tracing::debug!(worker_id, "Worker exiting");
}
