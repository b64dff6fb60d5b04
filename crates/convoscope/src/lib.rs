//! convoscope: analysis backend for conversation exports
//!
//! Uploaded exports are analyzed by background workers. Jobs move through a
//! small state machine, push progress to subscribers, and results are kept
//! in a content-addressed cache so identical exports are analyzed once.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod processing;
pub mod server;
pub mod service;

pub use analysis::{AnalysisOptions, AnalysisOutput, AnalysisSummary, AnalysisUnit, Analyzer, ProgressSink};
pub use cache::ContentAddressedCache;
pub use config::AppConfig;
pub use error::{Error, ErrorKind, Result};
pub use events::{EventStream, JobEvent, ProgressBroadcaster};
pub use processing::{JobId, JobState, JobView};
pub use service::AnalysisService;
