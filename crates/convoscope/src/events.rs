//! Per-job progress fan-out
//!
//! Subscribers register against a job id. Publication never blocks: each
//! listener gets a `try_send`, full listeners drop the event and closed
//! listeners are pruned. Nothing is retained for late subscribers; they
//! catch up by polling the job registry.
//!
//! Channel subscriptions keep one slot that only a terminal event may take,
//! so a lagging subscriber loses progress events but still sees how its job
//! ended.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::processing::{JobId, JobState};

/// Buffered events per channel subscriber
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Event pushed to job subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        job_id: JobId,
        percent: u8,
        message: String,
        status: JobState,
    },
    Complete {
        job_id: JobId,
        status: JobState,
    },
    Error {
        job_id: JobId,
        message: String,
        status: JobState,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::Complete { job_id, .. }
            | JobEvent::Error { job_id, .. } => *job_id,
        }
    }

    /// Complete and Error are the last events of a job
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress { .. })
    }

    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Progress { .. } => "progress",
            JobEvent::Complete { .. } => "complete",
            JobEvent::Error { .. } => "error",
        }
    }
}

/// Identifies one subscription
pub type ListenerId = u64;

/// Why a listener did not take an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Listener is behind; this event is dropped for it
    Full,
    /// Listener is gone and will be unsubscribed
    Disconnected,
}

/// Receiver side of a subscription
pub trait EventListener: Send + Sync {
    /// Must not block
    fn deliver(&self, event: &JobEvent) -> Result<(), DeliveryError>;
}

/// Listener backed by a bounded tokio channel.
///
/// Progress events never fill the last free slot; it is left for the
/// terminal event. Events of one job are published one at a time, so the
/// slot is still free when the terminal event arrives.
pub struct ChannelListener {
    tx: mpsc::Sender<JobEvent>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx }
    }
}

impl EventListener for ChannelListener {
    fn deliver(&self, event: &JobEvent) -> Result<(), DeliveryError> {
        if self.tx.is_closed() {
            return Err(DeliveryError::Disconnected);
        }
        if !event.is_terminal() && self.tx.capacity() <= 1 {
            return Err(DeliveryError::Full);
        }
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Push channel handed to a subscriber; ends after the job's terminal event
pub struct EventStream {
    id: Option<ListenerId>,
    rx: mpsc::Receiver<JobEvent>,
}

impl EventStream {
    /// A stream that yields `event` and then closes
    pub fn finished(event: JobEvent) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(event);
        Self { id: None, rx }
    }

    /// Subscription id, `None` for an already-finished stream
    pub fn listener_id(&self) -> Option<ListenerId> {
        self.id
    }

    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<JobEvent> {
        ReceiverStream::new(self.rx)
    }
}

struct Subscriber {
    id: ListenerId,
    listener: Arc<dyn EventListener>,
}

/// Fans job events out to subscribers of that job
pub struct ProgressBroadcaster {
    subscribers: RwLock<HashMap<JobId, Vec<Subscriber>>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a listener. Subscribing the same listener twice returns the first id.
    pub fn subscribe(&self, job_id: JobId, listener: Arc<dyn EventListener>) -> ListenerId {
        let mut subscribers = self.subscribers.write();
        let entry = subscribers.entry(job_id).or_default();

        let ptr = Arc::as_ptr(&listener) as *const ();
        if let Some(existing) = entry
            .iter()
            .find(|s| Arc::as_ptr(&s.listener) as *const () == ptr)
        {
            return existing.id;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.push(Subscriber { id, listener });
        tracing::debug!(%job_id, listener_id = id, "Subscribed to job");
        id
    }

    /// Subscribe through a new bounded channel holding `channel_capacity`
    /// progress events plus the reserved terminal slot
    pub fn channel(&self, job_id: JobId) -> EventStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity + 1);
        let id = self.subscribe(job_id, Arc::new(ChannelListener::new(tx)));
        EventStream { id: Some(id), rx }
    }

    /// Remove a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, job_id: JobId, listener_id: ListenerId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(entry) = subscribers.get_mut(&job_id) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|s| s.id != listener_id);
        let removed = entry.len() != before;
        if entry.is_empty() {
            subscribers.remove(&job_id);
        }
        if removed {
            tracing::debug!(%job_id, listener_id, "Unsubscribed from job");
        }
        removed
    }

    /// Deliver an event to every current subscriber of its job.
    ///
    /// Returns how many listeners accepted it. After a terminal event the
    /// job's subscriptions are dropped, which closes channel streams.
    pub fn publish(&self, event: &JobEvent) -> usize {
        let job_id = event.job_id();
        let targets: Vec<(ListenerId, Arc<dyn EventListener>)> = {
            let subscribers = self.subscribers.read();
            match subscribers.get(&job_id) {
                Some(entry) => entry
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.listener)))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        let mut disconnected = Vec::new();
        for (id, listener) in &targets {
            match listener.deliver(event) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    tracing::warn!(%job_id, listener_id = id, event = event.name(), "Listener lagging, event dropped");
                }
                Err(DeliveryError::Disconnected) => disconnected.push(*id),
            }
        }

        if event.is_terminal() {
            self.subscribers.write().remove(&job_id);
        } else if !disconnected.is_empty() {
            for id in disconnected {
                self.unsubscribe(job_id, id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers.read().get(&job_id).map_or(0, Vec::len)
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
