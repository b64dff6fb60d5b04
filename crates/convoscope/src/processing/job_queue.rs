//! FIFO queue of job ids feeding the worker pool

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::JobId;
use crate::error::{Error, Result};

/// Job id queue shared by all workers.
///
/// Holds identifiers only; job state lives in the registry. An id is handed
/// to exactly one worker and is never put back.
pub struct JobQueue {
    sender: mpsc::UnboundedSender<JobId>,
    receiver: Mutex<mpsc::UnboundedReceiver<JobId>>,
    depth: AtomicUsize,
    max_depth: Option<usize>,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create a queue, unbounded when `max_depth` is `None`
    pub fn new(max_depth: Option<usize>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
            max_depth,
            closed: AtomicBool::new(false),
        }
    }

    /// Append a job id. Never blocks.
    pub fn enqueue(&self, job_id: JobId) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::internal("Job queue is shut down"));
        }

        let reserved = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| match self.max_depth {
                Some(max) if depth >= max => None,
                _ => Some(depth + 1),
            });
        if let Err(depth) = reserved {
            tracing::warn!(%job_id, depth, "Job queue full, rejecting job");
            return Err(Error::QueueFull(depth));
        }

        if self.sender.send(job_id).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::internal("Job queue receiver dropped"));
        }
        Ok(())
    }

    /// Wait at most `wait` for the next job id.
    ///
    /// `None` means the queue stayed empty for the whole interval. Dropping
    /// the returned future before it resolves loses nothing.
    pub async fn dequeue(&self, wait: Duration) -> Option<JobId> {
        let next = tokio::time::timeout(wait, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await;

        match next {
            Ok(Some(job_id)) => {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                Some(job_id)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Stop accepting new jobs. Ids already queued stay where they are.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ids waiting to be dispatched
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }
}
