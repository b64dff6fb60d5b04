//! Analysis routine contract and result summarization
//!
//! The analysis itself is pluggable: anything implementing [`Analyzer`] can
//! be handed to the service. It runs on a blocking thread and reports
//! progress through a [`ProgressSink`].

mod conversation;
pub mod summary;

pub use conversation::ConversationAnalyzer;
pub use summary::{AnalysisSummary, QualitySummary, SummaryStats, ValueCount};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-job analysis toggles, fixed at submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    #[serde(alias = "enablePrivacyScan")]
    pub enable_privacy: bool,
    #[serde(alias = "enableQualityScan")]
    pub enable_quality: bool,
    #[serde(alias = "enableTemporalScan")]
    pub enable_temporal: bool,
    #[serde(alias = "enableVisualizations")]
    pub enable_visualizations: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            enable_privacy: true,
            enable_quality: true,
            enable_temporal: true,
            enable_visualizations: false,
        }
    }
}

/// One analyzable unit (a message) of the raw analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisUnit {
    pub conversation_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub content_length: usize,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_completion_status: Option<String>,
}

impl AnalysisUnit {
    /// Unit with only the structural fields set
    pub fn new(
        conversation_id: impl Into<String>,
        role: impl Into<String>,
        content_length: usize,
        word_count: usize,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: role.into(),
            category: None,
            content_length,
            word_count,
            topics: Vec::new(),
            sentiment: None,
            collaboration_quality: None,
            task_completion_status: None,
        }
    }
}

/// Raw output of an analysis run, in processing order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub units: Vec<AnalysisUnit>,
}

/// Failure raised by an analysis routine
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AnalysisError(pub String);

impl AnalysisError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One-way progress channel handed to an analyzer
pub trait ProgressSink: Send + Sync {
    /// Report overall progress (0-100) and the current phase
    fn report(&self, percent: u8, message: &str);
}

/// The expensive analysis routine
pub trait Analyzer: Send + Sync + 'static {
    /// Analyze a raw document. Called on a blocking thread.
    fn analyze(
        &self,
        document: &[u8],
        options: &AnalysisOptions,
        progress: &dyn ProgressSink,
    ) -> std::result::Result<AnalysisOutput, AnalysisError>;
}
