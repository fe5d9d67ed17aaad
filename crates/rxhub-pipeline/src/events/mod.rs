//! Durable event log boundary
//!
//! The pipeline's stages communicate only through an ordered, replayable
//! publish/subscribe channel with consumer-group semantics: each message is
//! delivered to exactly one member of a group, and deliveries that are
//! never acknowledged (member crash, member leaving) are redelivered to a
//! remaining member. Delivery is at-least-once; all consumers are written
//! to tolerate redelivery.
//!
//! [`MemoryEventLog`] is the in-process implementation used by the worker
//! binary and the test suite; a broker-backed implementation is an
//! operational swap behind the same traits.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

mod memory;

pub use memory::MemoryEventLog;

/// Topic carrying one event per recorded batch.
pub const TOPIC_BATCH_RECEIVED: &str = "catalog.batch-received";

/// Topic carrying one event per persisted chunk.
pub const TOPIC_CHUNK_READY: &str = "catalog.chunk-ready";

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Event log is closed")]
    Closed,

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message to publish.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl Message {
    pub fn new(topic: &str, key: &str, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// One message handed to one consumer-group member.
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    /// Position within the topic; acknowledgment token.
    pub offset: u64,
}

#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Append a message to a topic and wake its consumer groups.
    async fn publish(&self, message: Message) -> Result<(), EventLogError>;

    /// Join a consumer group on the given topics. Members of the same
    /// group split the stream between them.
    async fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Result<Box<dyn Subscription>, EventLogError>;

    /// Unprocessed message count (pending plus in-flight) for a group on
    /// a topic. This is the backlog signal the orchestrator scales on.
    async fn lag(&self, group: &str, topic: &str) -> Result<u64, EventLogError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the log shut down.
    async fn next(&mut self) -> Option<Delivery>;

    /// Acknowledge a delivery so it will not be redelivered.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), EventLogError>;

    /// Leave the group cleanly; unacknowledged deliveries are requeued
    /// for the remaining members.
    async fn leave(self: Box<Self>);
}

/// Publish a serializable event, keyed for per-pharmacy partitioning.
pub async fn publish_json<T: Serialize + Sync>(
    log: &dyn EventLog,
    topic: &str,
    key: &str,
    event: &T,
) -> Result<(), EventLogError> {
    let payload = serde_json::to_vec(event)?;
    log.publish(Message::new(topic, key, payload)).await
}
