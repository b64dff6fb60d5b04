//! Per-job analysis orchestration

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::job::{JobId, JobState};
use super::registry::{ClaimedJob, JobRegistry, ProgressChange};
use crate::analysis::{AnalysisSummary, Analyzer, ProgressSink};
use crate::cache::ContentAddressedCache;
use crate::config::{ProgressConfig, SummaryConfig};
use crate::document::{self, Document};
use crate::error::Error;

const LOADED_STEP: (u8, &str) = (15, "Data loaded successfully");
const ANALYZING_STEP: (u8, &str) = (25, "Analyzing conversations...");
const ANALYZED_PERCENT: u8 = 70;

/// Why a run stopped before completing
#[derive(Debug)]
enum Halt {
    /// The job left `Processing` under us; nothing more to write
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Halt::Failed(e)
    }
}

/// Runs claimed jobs: load, digest, cache lookup, analyze, summarize,
/// write through, complete.
pub struct AnalysisRunner {
    registry: Arc<JobRegistry>,
    cache: Arc<ContentAddressedCache>,
    analyzer: Arc<dyn Analyzer>,
    progress: ProgressConfig,
    summary: SummaryConfig,
    job_timeout: Duration,
}

impl AnalysisRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        cache: Arc<ContentAddressedCache>,
        analyzer: Arc<dyn Analyzer>,
        progress: ProgressConfig,
        summary: SummaryConfig,
        job_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            analyzer,
            progress,
            summary,
            job_timeout,
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Jobs that are no longer pending (cancelled before pickup, or already
    /// claimed) are skipped without any transition.
    pub async fn run(&self, job_id: JobId) {
        let Some(claimed) = self.registry.start_job(job_id) else {
            tracing::debug!(%job_id, "Skipping job that is no longer pending");
            return;
        };
        let deadline = Instant::now() + self.job_timeout;
        let started = Instant::now();

        match self.execute(&claimed, deadline).await {
            Ok(result) => {
                if self.registry.complete_job(job_id, result) {
                    tracing::info!(
                        %job_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Analysis finished"
                    );
                }
            }
            Err(Halt::Cancelled) => {
                tracing::info!(%job_id, "Run stopped, job was cancelled");
            }
            Err(Halt::Failed(e)) => {
                self.registry.fail_job(job_id, e.kind(), &failure_message(&e));
            }
        }
    }

    async fn execute(&self, job: &ClaimedJob, deadline: Instant) -> Result<Arc<AnalysisSummary>, Halt> {
        let job_id = job.id;

        self.checkpoint(job_id, deadline)?;
        let path = job.document_ref.clone();
        let document = tokio::task::spawn_blocking(move || Document::load(&path))
            .await
            .map_err(|e| Error::internal(format!("Document loader crashed: {}", e)))??;
        self.step(job_id, LOADED_STEP);

        let digest = document::digest_reader(document.bytes.as_slice()).map_err(Error::from)?;
        let key = digest.clone();
        if let Some(entry) = self.cache.blocking(move |cache| cache.get(&key)).await? {
            tracing::debug!(%job_id, %digest, "Cache hit, skipping analysis");
            self.checkpoint(job_id, deadline)?;
            return Ok(Arc::new(entry.result));
        }
        tracing::debug!(%job_id, %digest, "Cache miss");

        self.checkpoint(job_id, deadline)?;
        self.step(job_id, ANALYZING_STEP);

        let sink = CoalescingSink::new(Arc::clone(&self.registry), job_id, &self.progress);
        let analyzer = Arc::clone(&self.analyzer);
        let options = job.options.clone();
        let bytes = document.bytes;
        let outcome =
            tokio::task::spawn_blocking(move || analyzer.analyze(&bytes, &options, &sink)).await;

        self.checkpoint(job_id, deadline)?;
        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::analysis(e.0).into()),
            Err(join_error) => {
                tracing::error!(%job_id, error = %join_error, "Analyzer panicked");
                return Err(Error::analysis("Analysis routine crashed").into());
            }
        };

        let analyzed = format!("Analyzed {} messages", output.units.len());
        self.step(job_id, (ANALYZED_PERCENT, analyzed.as_str()));

        let summary = Arc::new(AnalysisSummary::from_output(&output, &self.summary));
        let stored = Arc::clone(&summary);
        self.cache
            .blocking(move |cache| cache.put(&digest, &stored))
            .await?;

        self.checkpoint(job_id, deadline)?;
        Ok(summary)
    }

    /// Stop if the job was cancelled or has run past its deadline
    fn checkpoint(&self, job_id: JobId, deadline: Instant) -> Result<(), Halt> {
        if self.registry.state(job_id) != Some(JobState::Processing) {
            return Err(Halt::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout(self.job_timeout.as_secs()).into());
        }
        Ok(())
    }

    fn step(&self, job_id: JobId, (percent, label): (u8, &str)) {
        self.registry.update_progress(job_id, percent, label, |_| true);
    }
}

/// Message recorded on a failed job: the analyzer's own text for analysis
/// errors, the error display otherwise.
fn failure_message(e: &Error) -> String {
    match e {
        Error::Analysis(message) => message.clone(),
        other => other.to_string(),
    }
}

struct SinkState {
    last_published: u8,
    last_publish_at: Instant,
}

/// Progress sink handed to the analyzer.
///
/// Every report updates the job; subscribers are told only when the percent
/// rose by at least `min_percent_delta`, or when the label changed and
/// `min_interval` has passed since the last event.
struct CoalescingSink {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    min_delta: u8,
    min_interval: Duration,
    state: Mutex<SinkState>,
}

impl CoalescingSink {
    fn new(registry: Arc<JobRegistry>, job_id: JobId, config: &ProgressConfig) -> Self {
        let last_published = registry.get_job(job_id).map_or(0, |job| job.progress());
        Self {
            registry,
            job_id,
            min_delta: config.min_percent_delta.max(1),
            min_interval: config.min_interval(),
            state: Mutex::new(SinkState {
                last_published,
                last_publish_at: Instant::now(),
            }),
        }
    }

    fn should_publish(&self, change: &ProgressChange) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let rose = change.percent >= state.last_published.saturating_add(self.min_delta);
        let relabel = change.label_changed && now.duration_since(state.last_publish_at) >= self.min_interval;

        if rose || relabel {
            state.last_published = change.percent;
            state.last_publish_at = now;
            true
        } else {
            false
        }
    }
}

impl ProgressSink for CoalescingSink {
    fn report(&self, percent: u8, message: &str) {
        let live = self
            .registry
            .update_progress(self.job_id, percent, message, |change| self.should_publish(change));
        if !live {
            tracing::trace!(job_id = %self.job_id, percent, "Progress after job left processing ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisError, AnalysisOptions, AnalysisOutput, AnalysisUnit};
    use crate::error::ErrorKind;
    use crate::events::{JobEvent, ProgressBroadcaster};
    use crate::processing::JobQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const EXPORT: &str = r#"{"conversations": [{"uuid": "c1", "chat_messages": []}]}"#;

    /// Reports the given percents, then returns `units` or fails
    struct Scripted {
        reports: Vec<u8>,
        fail_with: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(reports: Vec<u8>) -> Self {
            Self {
                reports,
                fail_with: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(reports: Vec<u8>, message: &'static str) -> Self {
            Self {
                fail_with: Some(message),
                ..Self::ok(reports)
            }
        }
    }

    impl Analyzer for Scripted {
        fn analyze(
            &self,
            _bytes: &[u8],
            _options: &AnalysisOptions,
            progress: &dyn ProgressSink,
        ) -> Result<AnalysisOutput, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for percent in &self.reports {
                progress.report(*percent, "working");
            }
            if let Some(message) = self.fail_with {
                return Err(AnalysisError::new(message));
            }
            Ok(AnalysisOutput {
                units: vec![
                    AnalysisUnit::new("c1", "user", 10, 2),
                    AnalysisUnit::new("c1", "assistant", 20, 4),
                    AnalysisUnit::new("c1", "user", 30, 6),
                ],
            })
        }
    }

    /// Takes longer than the job is allowed to run
    struct Slow(Duration);

    impl Analyzer for Slow {
        fn analyze(
            &self,
            _bytes: &[u8],
            _options: &AnalysisOptions,
            progress: &dyn ProgressSink,
        ) -> Result<AnalysisOutput, AnalysisError> {
            progress.report(40, "working");
            std::thread::sleep(self.0);
            Ok(AnalysisOutput {
                units: vec![AnalysisUnit::new("c1", "user", 10, 2)],
            })
        }
    }

    struct Panics;

    impl Analyzer for Panics {
        fn analyze(
            &self,
            _bytes: &[u8],
            _options: &AnalysisOptions,
            _progress: &dyn ProgressSink,
        ) -> Result<AnalysisOutput, AnalysisError> {
            panic!("analyzer bug")
        }
    }

    struct Fixture {
        dir: TempDir,
        registry: Arc<JobRegistry>,
        cache: Arc<ContentAddressedCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cache = Arc::new(ContentAddressedCache::open(dir.path().join("cache"), 1 << 30).unwrap());
            let registry = Arc::new(JobRegistry::new(
                Arc::new(JobQueue::new(None)),
                Arc::new(ProgressBroadcaster::new()),
            ));
            Self { dir, registry, cache }
        }

        fn document(&self, name: &str, contents: &str) -> std::path::PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            path
        }

        fn runner(&self, analyzer: Arc<dyn Analyzer>, timeout: Duration) -> AnalysisRunner {
            AnalysisRunner::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.cache),
                analyzer,
                ProgressConfig {
                    min_percent_delta: 1,
                    min_interval_ms: 0,
                },
                SummaryConfig::default(),
                timeout,
            )
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_successful_run() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let runner = fx.runner(Arc::new(Scripted::ok(vec![40, 60])), TIMEOUT);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();
        let mut events = fx.registry.subscribe(job_id).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Complete);
        assert_eq!(job.progress(), 100);
        let result = job.result().unwrap();
        assert_eq!(result.summary.total_messages, 3);
        assert_eq!(result.summary.user_messages, 2);
        assert_eq!(result.summary.assistant_messages, 1);
        assert_eq!(fx.cache.len(), 1);

        let mut percents = Vec::new();
        let mut last = None;
        while let Some(event) = events.recv().await {
            if let JobEvent::Progress { percent, .. } = &event {
                percents.push(*percent);
            }
            last = Some(event);
        }
        assert_eq!(percents, vec![5, 15, 25, 40, 60, 70]);
        assert!(matches!(last, Some(JobEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_failure_after_progress() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let runner = fx.runner(Arc::new(Scripted::failing(vec![40], "model exploded")), TIMEOUT);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.progress(), 40);
        assert_eq!(job.error(), Some("model exploded"));
        assert_eq!(job.error_kind(), Some(ErrorKind::Analysis));
        assert!(fx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_fails() {
        let fx = Fixture::new();
        let runner = fx.runner(Arc::new(Scripted::ok(vec![])), TIMEOUT);
        let job_id = fx
            .registry
            .create_job(fx.dir.path().join("gone.json"), AnalysisOptions::default())
            .unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert!(job.error().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_malformed_document_fails_validation() {
        let fx = Fixture::new();
        let path = fx.document("bad.json", r#"{"conversations": []}"#);
        let analyzer = Arc::new(Scripted::ok(vec![]));
        let runner = fx.runner(analyzer.clone(), TIMEOUT);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error_kind(), Some(ErrorKind::Validation));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_analysis() {
        let fx = Fixture::new();
        let first = fx.document("a.json", EXPORT);
        let second = fx.document("b.json", EXPORT);
        let analyzer = Arc::new(Scripted::ok(vec![50]));
        let runner = fx.runner(analyzer.clone(), TIMEOUT);

        let a = fx.registry.create_job(&first, AnalysisOptions::default()).unwrap();
        runner.run(a).await;
        let b = fx.registry.create_job(&second, AnalysisOptions::default()).unwrap();
        runner.run(b).await;

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        let a = fx.registry.get_job(a).unwrap();
        let b = fx.registry.get_job(b).unwrap();
        assert_eq!(b.state(), JobState::Complete);
        assert_eq!(a.result().unwrap().as_ref(), b.result().unwrap().as_ref());
    }

    #[tokio::test]
    async fn test_cancelled_before_pickup_is_skipped() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let analyzer = Arc::new(Scripted::ok(vec![]));
        let runner = fx.runner(analyzer.clone(), TIMEOUT);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();
        fx.registry.cancel_job(job_id);

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(job.started_at().is_none());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_elapsed_deadline_fails_with_timeout() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let analyzer = Arc::new(Scripted::ok(vec![]));
        let runner = fx.runner(analyzer.clone(), Duration::ZERO);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analysis_overrunning_deadline_fails_with_timeout() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let runner = fx.runner(Arc::new(Slow(Duration::from_millis(800))), Duration::from_millis(250));
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();
        let mut events = fx.registry.subscribe(job_id).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error_kind(), Some(ErrorKind::Timeout));
        // the analyzer ran; its result is neither recorded nor cached
        assert_eq!(job.progress(), 40);
        assert!(job.result().is_none());
        assert!(fx.cache.is_empty());

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(JobEvent::Error { status: JobState::Failed, .. })));
    }

    #[tokio::test]
    async fn test_panicking_analyzer_fails_job() {
        let fx = Fixture::new();
        let path = fx.document("a.json", EXPORT);
        let runner = fx.runner(Arc::new(Panics), TIMEOUT);
        let job_id = fx.registry.create_job(&path, AnalysisOptions::default()).unwrap();

        runner.run(job_id).await;

        let job = fx.registry.get_job(job_id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error_kind(), Some(ErrorKind::Analysis));
    }

    #[tokio::test]
    async fn test_sink_coalesces_small_steps() {
        let fx = Fixture::new();
        let job_id = fx.registry.create_job("a.json", AnalysisOptions::default()).unwrap();
        fx.registry.start_job(job_id);
        let mut events = fx.registry.subscribe(job_id).unwrap();

        let sink = CoalescingSink::new(
            Arc::clone(&fx.registry),
            job_id,
            &ProgressConfig {
                min_percent_delta: 10,
                min_interval_ms: 60_000,
            },
        );
        for percent in [6, 9, 15, 16, 30] {
            sink.report(percent, "step");
        }
        fx.registry.cancel_job(job_id);

        let mut percents = Vec::new();
        while let Some(event) = events.recv().await {
            if let JobEvent::Progress { percent, .. } = event {
                percents.push(percent);
            }
        }
        assert_eq!(percents, vec![15, 30]);
        // job state still saw every report
        assert_eq!(fx.registry.get_job(job_id).unwrap().progress(), 30);
    }
}
