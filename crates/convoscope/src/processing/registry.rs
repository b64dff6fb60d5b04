//! Registry of known jobs
//!
//! The registry owns every [`Job`] record. Each transition and the event it
//! produces happen while the job's map entry is locked, so subscribers see a
//! job's events in the order its state changed and the terminal event last.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use super::job::{Job, JobId, JobState, JobView};
use super::job_queue::JobQueue;
use crate::analysis::{AnalysisOptions, AnalysisSummary};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{EventStream, ProgressBroadcaster};

/// Label of the first processing step
pub const LOADING_STEP: &str = "Loading data...";
const LOADING_PERCENT: u8 = 5;

/// Job counts per state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Ids waiting in the queue, including cancelled ones not yet skipped
    pub queue_depth: usize,
}

impl JobStats {
    /// Jobs not yet finished
    pub fn active(&self) -> usize {
        self.pending + self.processing
    }
}

/// What a worker needs to run a job it just claimed
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub document_ref: PathBuf,
    pub options: AnalysisOptions,
}

/// A progress report as seen under the job lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressChange {
    pub previous_percent: u8,
    pub percent: u8,
    pub label_changed: bool,
}

/// Source of truth for job state
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
    queue: Arc<JobQueue>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl JobRegistry {
    pub fn new(queue: Arc<JobQueue>, broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self {
            jobs: DashMap::new(),
            queue,
            broadcaster,
        }
    }

    /// Insert a pending job and enqueue it.
    ///
    /// The id is returned only after the record is visible. If the queue
    /// refuses the job, the record is removed again and the error returned.
    pub fn create_job(&self, document_ref: impl Into<PathBuf>, options: AnalysisOptions) -> Result<JobId> {
        let job = Job::new(document_ref, options);
        let job_id = job.id();
        self.jobs.insert(job_id, job);

        if let Err(e) = self.queue.enqueue(job_id) {
            self.jobs.remove(&job_id);
            return Err(e);
        }

        tracing::info!(%job_id, "Job created");
        Ok(job_id)
    }

    /// Snapshot of a job record
    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(&job_id).map(|job| job.clone())
    }

    pub fn view(&self, job_id: JobId) -> Option<JobView> {
        self.jobs.get(&job_id).map(|job| job.view())
    }

    pub fn state(&self, job_id: JobId) -> Option<JobState> {
        self.jobs.get(&job_id).map(|job| job.state())
    }

    /// Cancel a pending or processing job.
    ///
    /// Returns false, without touching anything, for unknown or finished jobs.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let Some(mut job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        let was = job.state();
        if !job.cancel() {
            return false;
        }
        if let Some(event) = job.terminal_event() {
            self.broadcaster.publish(&event);
        }
        tracing::info!(%job_id, from = %was, "Job cancelled");
        true
    }

    /// Claim a pending job for processing.
    ///
    /// Succeeds for exactly one caller per job; a cancelled or unknown job
    /// yields `None`.
    pub fn start_job(&self, job_id: JobId) -> Option<ClaimedJob> {
        let mut job = self.jobs.get_mut(&job_id)?;
        if !job.start() {
            return None;
        }
        job.record_progress(LOADING_PERCENT, LOADING_STEP);
        self.broadcaster.publish(&job.progress_event());
        tracing::info!(%job_id, "Job started");

        Some(ClaimedJob {
            id: job_id,
            document_ref: job.document_ref().to_path_buf(),
            options: job.options().clone(),
        })
    }

    /// Record progress on a processing job.
    ///
    /// `should_publish` sees the change under the job lock and decides
    /// whether subscribers hear about it. Returns false if the job is no
    /// longer processing.
    pub fn update_progress<F>(&self, job_id: JobId, percent: u8, step: &str, should_publish: F) -> bool
    where
        F: FnOnce(&ProgressChange) -> bool,
    {
        let Some(mut job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        let previous_percent = job.progress();
        let label_changed = job.current_step() != step;
        if !job.record_progress(percent, step) {
            return false;
        }

        let change = ProgressChange {
            previous_percent,
            percent: job.progress(),
            label_changed,
        };
        if should_publish(&change) {
            self.broadcaster.publish(&job.progress_event());
        }
        true
    }

    /// Processing -> Complete, publishing the completion event
    pub fn complete_job(&self, job_id: JobId, result: Arc<AnalysisSummary>) -> bool {
        let Some(mut job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        if !job.complete(result) {
            return false;
        }
        if let Some(event) = job.terminal_event() {
            self.broadcaster.publish(&event);
        }
        tracing::info!(%job_id, "Job complete");
        true
    }

    /// Processing -> Failed, publishing the error event
    pub fn fail_job(&self, job_id: JobId, kind: ErrorKind, message: &str) -> bool {
        let Some(mut job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        if !job.fail(kind, message) {
            return false;
        }
        if let Some(event) = job.terminal_event() {
            self.broadcaster.publish(&event);
        }
        tracing::error!(%job_id, ?kind, error = message, "Job failed");
        true
    }

    /// Open a push stream for a job.
    ///
    /// A finished job yields its terminal event once and closes. The entry
    /// stays locked while subscribing so no transition slips in between.
    pub fn subscribe(&self, job_id: JobId) -> Result<EventStream> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| Error::not_found(format!("Job '{}'", job_id)))?;

        Ok(match job.terminal_event() {
            Some(event) => EventStream::finished(event),
            None => self.broadcaster.channel(job_id),
        })
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats {
            queue_depth: self.queue.depth(),
            ..Default::default()
        };
        for job in self.jobs.iter() {
            stats.total += 1;
            match job.state() {
                JobState::Pending => stats.pending += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Complete => stats.complete += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn list_jobs(&self) -> Vec<JobView> {
        let mut jobs: Vec<JobView> = self.jobs.iter().map(|job| job.view()).collect();
        jobs.sort_by_key(|view| view.created_at);
        jobs
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisOutput;
    use crate::config::SummaryConfig;
    use crate::events::JobEvent;
    use std::time::Duration;

    fn registry() -> JobRegistry {
        JobRegistry::new(
            Arc::new(JobQueue::new(None)),
            Arc::new(ProgressBroadcaster::new()),
        )
    }

    fn summary() -> Arc<AnalysisSummary> {
        Arc::new(AnalysisSummary::from_output(
            &AnalysisOutput::default(),
            &SummaryConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_create_enqueues_pending_job() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();

        assert_eq!(registry.state(job_id), Some(JobState::Pending));
        assert_eq!(registry.queue().depth(), 1);
        assert_eq!(
            registry.queue().dequeue(Duration::from_millis(10)).await,
            Some(job_id)
        );
    }

    #[test]
    fn test_full_queue_leaves_no_record() {
        let registry = JobRegistry::new(
            Arc::new(JobQueue::new(Some(1))),
            Arc::new(ProgressBroadcaster::new()),
        );
        registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        let err = registry.create_job("b.json", AnalysisOptions::default()).unwrap_err();

        assert!(matches!(err, Error::QueueFull(_)));
        assert_eq!(registry.stats().total, 1);
    }

    #[test]
    fn test_start_claims_once() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();

        let claimed = registry.start_job(job_id).unwrap();
        assert_eq!(claimed.document_ref, PathBuf::from("a.json"));
        assert!(registry.start_job(job_id).is_none());

        let job = registry.get_job(job_id).unwrap();
        assert_eq!(job.progress(), LOADING_PERCENT);
        assert_eq!(job.current_step(), LOADING_STEP);
    }

    #[test]
    fn test_cancel_pending_prevents_start() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();

        assert!(registry.cancel_job(job_id));
        assert_eq!(registry.state(job_id), Some(JobState::Cancelled));
        assert!(registry.start_job(job_id).is_none());
        assert!(!registry.cancel_job(job_id));
    }

    #[test]
    fn test_cancel_unknown_and_finished() {
        let registry = registry();
        assert!(!registry.cancel_job(uuid::Uuid::new_v4()));

        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        registry.start_job(job_id);
        assert!(registry.complete_job(job_id, summary()));

        let before = registry.view(job_id).unwrap();
        assert!(!registry.cancel_job(job_id));
        let after = registry.view(job_id).unwrap();
        assert_eq!(after.status, JobState::Complete);
        assert_eq!(after.completed_at, before.completed_at);
    }

    #[test]
    fn test_progress_rejected_after_cancel() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        registry.start_job(job_id);
        registry.cancel_job(job_id);

        assert!(!registry.update_progress(job_id, 50, "late", |_| true));
        assert!(!registry.complete_job(job_id, summary()));
        assert!(!registry.fail_job(job_id, ErrorKind::Analysis, "late"));
        assert_eq!(registry.state(job_id), Some(JobState::Cancelled));
    }

    #[tokio::test]
    async fn test_event_order_ends_with_terminal() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        let mut stream = registry.subscribe(job_id).unwrap();

        registry.start_job(job_id);
        registry.update_progress(job_id, 40, "Analyzing conversations...", |_| true);
        // not published
        registry.update_progress(job_id, 41, "Analyzing conversations...", |_| false);
        registry.fail_job(job_id, ErrorKind::Analysis, "boom");
        registry.update_progress(job_id, 90, "ignored", |_| true);

        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], JobEvent::Progress { percent: 5, .. }));
        assert!(matches!(events[1], JobEvent::Progress { percent: 40, .. }));
        match &events[2] {
            JobEvent::Error { message, status, .. } => {
                assert_eq!(message, "boom");
                assert_eq!(*status, JobState::Failed);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(registry.get_job(job_id).unwrap().progress(), 41);
    }

    #[tokio::test]
    async fn test_unread_stream_still_ends_with_complete() {
        let registry = JobRegistry::new(
            Arc::new(JobQueue::new(None)),
            Arc::new(ProgressBroadcaster::with_capacity(4)),
        );
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        let mut stream = registry.subscribe(job_id).unwrap();

        registry.start_job(job_id);
        for percent in (10..=90).step_by(9) {
            registry.update_progress(job_id, percent, "Analyzing conversations...", |_| true);
        }
        registry.complete_job(job_id, summary());

        let mut names = Vec::new();
        while let Some(event) = stream.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["progress", "progress", "progress", "progress", "complete"]);
    }

    #[tokio::test]
    async fn test_subscribe_to_finished_job() {
        let registry = registry();
        let job_id = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        registry.cancel_job(job_id);

        let mut stream = registry.subscribe(job_id).unwrap();
        assert!(matches!(
            stream.recv().await,
            Some(JobEvent::Error { status: JobState::Cancelled, .. })
        ));
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_subscribe_unknown_job() {
        let registry = registry();
        assert!(matches!(
            registry.subscribe(uuid::Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_stats() {
        let registry = registry();
        let a = registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        let b = registry.create_job("b.json", AnalysisOptions::default()).unwrap();
        registry.create_job("c.json", AnalysisOptions::default()).unwrap();
        registry.start_job(a);
        registry.cancel_job(b);

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.active(), 2);
        assert_eq!(registry.list_jobs().len(), 3);
    }
}
