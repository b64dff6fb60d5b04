//! Background analysis jobs: records, queue, workers and the per-job runner

pub mod job;
pub mod job_queue;
pub mod registry;
pub mod runner;
pub mod worker;

pub use job::{Job, JobId, JobState, JobView, CANCELLED_MESSAGE};
pub use job_queue::JobQueue;
pub use registry::{ClaimedJob, JobRegistry, JobStats, ProgressChange};
pub use runner::AnalysisRunner;
pub use worker::WorkerPool;
