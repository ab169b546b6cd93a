//! Publish pipeline
//!
//! Callers hand tasks to an unbounded queue; exactly one publisher worker
//! drains it and performs every broker write.
//!
//! ```text
//! publish() ──► PublishQueue ──► PublisherWorker ──► BrokerSession::write
//! publish() ──┘   (barrier)            │
//!                                      └─ on error ──► FailureSink
//! ```
//!
//! A single worker keeps writes in submission order on one session and
//! avoids concurrent writes against it. Throughput scales by running more
//! gateways, not more workers.

mod queue;
mod worker;

pub use queue::{Poll, PublishQueue, QueueReceiver};
pub use worker::PublisherWorker;

use crate::codec::JsonPayload;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// One message waiting to be published
///
/// The payload stays unserialized until the worker picks the task up.
pub struct PublishTask {
    /// Destination topic
    pub topic: String,
    /// Payload, serialized by the worker
    pub payload: Box<dyn JsonPayload>,
    /// When the caller enqueued the task
    pub enqueued_at: Instant,
}

impl PublishTask {
    /// Create a task for `payload` on `topic`
    pub fn new<T>(topic: impl Into<String>, payload: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self {
            topic: topic.into(),
            payload: Box::new(payload),
            enqueued_at: Instant::now(),
        }
    }
}

impl fmt::Debug for PublishTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishTask")
            .field("topic", &self.topic)
            .field("payload_type", &self.payload.type_name())
            .finish()
    }
}

/// Terminal outcome of every task the worker handled
///
/// `sent + failed + unrecorded + dropped` equals the number of tasks the
/// worker took off the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Written to the broker
    pub sent: u64,
    /// Not taken by the broker, recorded in the failure sink
    pub failed: u64,
    /// Not taken by the broker, and the failure sink write failed too
    pub unrecorded: u64,
    /// Payload could not be serialized
    pub dropped: u64,
}

impl DrainReport {
    /// Number of tasks handled
    pub fn total(&self) -> u64 {
        self.sent + self.failed + self.unrecorded + self.dropped
    }
}
