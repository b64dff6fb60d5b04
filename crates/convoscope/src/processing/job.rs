//! Job record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::{AnalysisOptions, AnalysisSummary};
use crate::error::ErrorKind;
use crate::events::JobEvent;

/// Job identifier
pub type JobId = Uuid;

/// Message carried by the terminal event of a cancelled job
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

/// Job lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Cancelled)
    }

    /// Allowed edges of the lifecycle
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Processing, JobState::Complete)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical job record, owned by the registry.
///
/// Fields only change through the transition methods, which refuse any
/// edge not allowed by [`JobState::can_transition_to`].
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    document_ref: PathBuf,
    options: AnalysisOptions,
    state: JobState,
    progress: u8,
    current_step: String,
    result: Option<Arc<AnalysisSummary>>,
    error: Option<String>,
    error_kind: Option<ErrorKind>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(document_ref: impl Into<PathBuf>, options: AnalysisOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_ref: document_ref.into(),
            options,
            state: JobState::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            result: None,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn document_ref(&self) -> &Path {
        &self.document_ref
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn result(&self) -> Option<&Arc<AnalysisSummary>> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Pending -> Processing
    pub fn start(&mut self) -> bool {
        if !self.state.can_transition_to(JobState::Processing) {
            return false;
        }
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move progress forward while processing.
    ///
    /// The percent is capped at 99 and never goes down; the label always
    /// follows the latest report. Returns false if the job is not processing.
    pub fn record_progress(&mut self, percent: u8, step: &str) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        self.progress = self.progress.max(percent.min(99));
        if self.current_step != step {
            self.current_step = step.to_string();
        }
        true
    }

    /// Processing -> Complete
    pub fn complete(&mut self, result: Arc<AnalysisSummary>) -> bool {
        if !self.state.can_transition_to(JobState::Complete) {
            return false;
        }
        self.state = JobState::Complete;
        self.progress = 100;
        self.current_step = "Analysis complete".to_string();
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Processing -> Failed. Progress stays where it was.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> bool {
        if !self.state.can_transition_to(JobState::Failed) {
            return false;
        }
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Analysis failed".to_string();
        }
        self.state = JobState::Failed;
        self.error = Some(message);
        self.error_kind = Some(kind);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Pending|Processing -> Cancelled
    pub fn cancel(&mut self) -> bool {
        if !self.state.can_transition_to(JobState::Cancelled) {
            return false;
        }
        self.state = JobState::Cancelled;
        self.current_step = CANCELLED_MESSAGE.to_string();
        self.completed_at = Some(Utc::now());
        true
    }

    /// Progress event for the current fields
    pub fn progress_event(&self) -> JobEvent {
        JobEvent::Progress {
            job_id: self.id,
            percent: self.progress,
            message: self.current_step.clone(),
            status: self.state,
        }
    }

    /// Terminal event describing a finished job, `None` while it is still live
    pub fn terminal_event(&self) -> Option<JobEvent> {
        match self.state {
            JobState::Complete => Some(JobEvent::Complete {
                job_id: self.id,
                status: self.state,
            }),
            JobState::Failed => Some(JobEvent::Error {
                job_id: self.id,
                message: self.error.clone().unwrap_or_default(),
                status: self.state,
            }),
            JobState::Cancelled => Some(JobEvent::Error {
                job_id: self.id,
                message: CANCELLED_MESSAGE.to_string(),
                status: self.state,
            }),
            JobState::Pending | JobState::Processing => None,
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id,
            status: self.state,
            progress: self.progress,
            current_step: self.current_step.clone(),
            options: self.options.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind,
        }
    }
}

/// Read-only snapshot returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobState,
    pub progress: u8,
    pub current_step: String,
    pub options: AnalysisOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<AnalysisSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}
