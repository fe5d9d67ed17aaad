//! In-process event log with consumer-group semantics.
//!
//! Messages are retained per topic; each consumer group tracks a pending
//! queue and an in-flight set of offsets. A subscription that drops or
//! leaves without acknowledging requeues its in-flight offsets, so a
//! crashed worker's chunk is redelivered to a remaining member.
//!
//! Groups only see messages published after they first subscribe.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{Delivery, EventLog, EventLogError, Message, Subscription};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: String,
    payload: Vec<u8>,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct GroupQueue {
    pending: VecDeque<u64>,
    inflight: HashSet<u64>,
}

#[derive(Debug, Default)]
struct TopicState {
    messages: Vec<StoredMessage>,
    groups: HashMap<String, GroupQueue>,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, TopicState>,
    closed: bool,
}

/// See module docs.
pub struct MemoryEventLog {
    inner: Arc<Mutex<Inner>>,
    version_tx: Arc<watch::Sender<u64>>,
    version_rx: watch::Receiver<u64>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        let (version_tx, version_rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            version_tx: Arc::new(version_tx),
            version_rx,
        }
    }

    /// Shut the log down: waiting subscribers observe end-of-stream.
    pub fn close(&self) {
        lock(&self.inner).closed = true;
        self.version_tx.send_modify(|v| *v += 1);
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn publish(&self, message: Message) -> Result<(), EventLogError> {
        {
            let mut inner = lock(&self.inner);
            if inner.closed {
                return Err(EventLogError::Closed);
            }

            let topic = inner.topics.entry(message.topic.clone()).or_default();
            let offset = topic.messages.len() as u64;
            topic.messages.push(StoredMessage {
                key: message.key,
                payload: message.payload,
                headers: message.headers,
            });
            for queue in topic.groups.values_mut() {
                queue.pending.push_back(offset);
            }
        }
        self.version_tx.send_modify(|v| *v += 1);
        Ok(())
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Result<Box<dyn Subscription>, EventLogError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(EventLogError::Closed);
        }

        for topic in topics {
            inner
                .topics
                .entry(topic.to_string())
                .or_default()
                .groups
                .entry(group.to_string())
                .or_default();
        }

        debug!(group, ?topics, "Consumer joined group");

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            version_tx: Arc::clone(&self.version_tx),
            version_rx: self.version_rx.clone(),
            group: group.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            inflight: Vec::new(),
        }))
    }

    async fn lag(&self, group: &str, topic: &str) -> Result<u64, EventLogError> {
        let inner = lock(&self.inner);
        let count = inner
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|q| q.pending.len() + q.inflight.len())
            .unwrap_or(0);
        Ok(count as u64)
    }
}

struct MemorySubscription {
    inner: Arc<Mutex<Inner>>,
    version_tx: Arc<watch::Sender<u64>>,
    version_rx: watch::Receiver<u64>,
    group: String,
    topics: Vec<String>,
    /// Deliveries handed to this member and not yet acknowledged.
    inflight: Vec<(String, u64)>,
}

impl MemorySubscription {
    fn try_take(&mut self) -> Option<Delivery> {
        let mut inner = lock(&self.inner);
        for topic_name in &self.topics {
            let Some(topic) = inner.topics.get_mut(topic_name) else {
                continue;
            };
            let Some(queue) = topic.groups.get_mut(&self.group) else {
                continue;
            };
            if let Some(offset) = queue.pending.pop_front() {
                queue.inflight.insert(offset);
                let stored = &topic.messages[offset as usize];
                let delivery = Delivery {
                    topic: topic_name.clone(),
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                    headers: stored.headers.clone(),
                    offset,
                };
                self.inflight.push((topic_name.clone(), offset));
                return Some(delivery);
            }
        }
        None
    }

    fn requeue_inflight(&mut self) {
        if self.inflight.is_empty() {
            return;
        }
        {
            let mut inner = lock(&self.inner);
            for (topic_name, offset) in self.inflight.drain(..) {
                if let Some(queue) = inner
                    .topics
                    .get_mut(&topic_name)
                    .and_then(|t| t.groups.get_mut(&self.group))
                {
                    if queue.inflight.remove(&offset) {
                        queue.pending.push_back(offset);
                    }
                }
            }
        }
        self.version_tx.send_modify(|v| *v += 1);
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            if lock(&self.inner).closed {
                return None;
            }
            if let Some(delivery) = self.try_take() {
                return Some(delivery);
            }
            if self.version_rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), EventLogError> {
        let mut inner = lock(&self.inner);
        if let Some(queue) = inner
            .topics
            .get_mut(&delivery.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
        {
            queue.inflight.remove(&delivery.offset);
        }
        self.inflight
            .retain(|(topic, offset)| !(topic == &delivery.topic && *offset == delivery.offset));
        Ok(())
    }

    async fn leave(mut self: Box<Self>) {
        self.requeue_inflight();
        debug!(group = %self.group, "Consumer left group");
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        // A dropped member behaves like a crashed one: its unacknowledged
        // deliveries go back to the group.
        self.requeue_inflight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, key: &str, body: &str) -> Message {
        Message::new(topic, key, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_message() {
        let log = MemoryEventLog::new();
        let mut sub = log.subscribe("g1", &["t"]).await.unwrap();

        log.publish(message("t", "k", "hello")).await.unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.key, "k");
        sub.ack(&delivery).await.unwrap();

        assert_eq!(log.lag("g1", "t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_group_members_split_the_stream() {
        let log = MemoryEventLog::new();
        let mut a = log.subscribe("g1", &["t"]).await.unwrap();
        let mut b = log.subscribe("g1", &["t"]).await.unwrap();

        log.publish(message("t", "k", "m0")).await.unwrap();
        log.publish(message("t", "k", "m1")).await.unwrap();

        let first = a.next().await.unwrap();
        let second = b.next().await.unwrap();

        // Exactly one member sees each message.
        assert_ne!(first.offset, second.offset);
        a.ack(&first).await.unwrap();
        b.ack(&second).await.unwrap();
        assert_eq!(log.lag("g1", "t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_independent_groups_both_see_every_message() {
        let log = MemoryEventLog::new();
        let mut a = log.subscribe("g1", &["t"]).await.unwrap();
        let mut b = log.subscribe("g2", &["t"]).await.unwrap();

        log.publish(message("t", "k", "m0")).await.unwrap();

        assert_eq!(a.next().await.unwrap().payload, b"m0");
        assert_eq!(b.next().await.unwrap().payload, b"m0");
    }

    #[tokio::test]
    async fn test_unacked_delivery_requeued_when_member_leaves() {
        let log = MemoryEventLog::new();
        let mut a = log.subscribe("g1", &["t"]).await.unwrap();
        let mut b = log.subscribe("g1", &["t"]).await.unwrap();

        log.publish(message("t", "k", "m0")).await.unwrap();

        let taken = a.next().await.unwrap();
        assert_eq!(taken.payload, b"m0");
        assert_eq!(log.lag("g1", "t").await.unwrap(), 1);

        // Member leaves without acking; the remaining member gets it.
        a.leave().await;
        let redelivered = b.next().await.unwrap();
        assert_eq!(redelivered.payload, b"m0");
        b.ack(&redelivered).await.unwrap();
        assert_eq!(log.lag("g1", "t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_member_requeues_like_a_crash() {
        let log = MemoryEventLog::new();
        let mut a = log.subscribe("g1", &["t"]).await.unwrap();
        log.publish(message("t", "k", "m0")).await.unwrap();
        let _taken = a.next().await.unwrap();
        drop(a);

        let mut b = log.subscribe("g1", &["t"]).await.unwrap();
        assert_eq!(b.next().await.unwrap().payload, b"m0");
    }

    #[tokio::test]
    async fn test_group_does_not_see_messages_before_it_joined() {
        let log = MemoryEventLog::new();
        log.publish(message("t", "k", "early")).await.unwrap();

        let mut sub = log.subscribe("g1", &["t"]).await.unwrap();
        log.publish(message("t", "k", "late")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, b"late");
    }

    #[tokio::test]
    async fn test_lag_counts_pending_and_inflight() {
        let log = MemoryEventLog::new();
        let mut sub = log.subscribe("g1", &["t"]).await.unwrap();

        log.publish(message("t", "k", "m0")).await.unwrap();
        log.publish(message("t", "k", "m1")).await.unwrap();
        assert_eq!(log.lag("g1", "t").await.unwrap(), 2);

        let delivery = sub.next().await.unwrap();
        assert_eq!(log.lag("g1", "t").await.unwrap(), 2);

        sub.ack(&delivery).await.unwrap();
        assert_eq!(log.lag("g1", "t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_the_stream() {
        let log = MemoryEventLog::new();
        let mut sub = log.subscribe("g1", &["t"]).await.unwrap();
        log.close();
        assert!(sub.next().await.is_none());
        assert!(matches!(
            log.publish(message("t", "k", "m0")).await,
            Err(EventLogError::Closed)
        ));
    }
}
