//! In-process broker.
//!
//! Each topic is an append-only log. A group's position is its committed
//! offset, so `fetch` keeps returning the first uncommitted message until it
//! is committed.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::sync::Notify;

use crate::backends::queue::{Broker, Message, QueueError};
use crate::monitor::transaction::unix_millis;

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Message>,
    /// Next offset to deliver, per group.
    positions: HashMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    topics: DashMap<String, TopicLog>,
    published: Notify,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages ever published to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |t| t.messages.len())
    }

    /// Last offset committed by `group_id`, if any.
    pub fn committed(&self, topic: &str, group_id: &str) -> Option<u64> {
        let log = self.topics.get(topic)?;
        log.positions.get(group_id).and_then(|next| next.checked_sub(1))
    }

    fn next(&self, topic: &str, group_id: &str) -> Option<Message> {
        let log = self.topics.get(topic)?;
        let position = log.positions.get(group_id).copied().unwrap_or(0);
        log.messages.get(position as usize).cloned()
    }

    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, values: Vec<Vec<u8>>) -> Result<(), QueueError> {
        self.check_open()?;
        {
            let mut log = self.topics.entry(topic.to_string()).or_default();
            for value in values {
                let offset = log.messages.len() as u64;
                log.messages.push(Message {
                    topic: topic.to_string(),
                    offset,
                    value,
                    timestamp_ms: unix_millis(SystemTime::now()),
                });
            }
        }
        self.published.notify_waiters();
        Ok(())
    }

    async fn fetch(&self, topic: &str, group_id: &str) -> Result<Message, QueueError> {
        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_open()?;
            if let Some(message) = self.next(topic, group_id) {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&self, topic: &str, group_id: &str, offset: u64) -> Result<(), QueueError> {
        self.check_open()?;
        let mut log = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::UnknownTopic(topic.to_string()))?;
        let position = log.positions.entry(group_id.to_string()).or_insert(0);
        *position = (*position).max(offset + 1);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        self.published.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_waits_for_publish() {
        let broker = Arc::new(MemoryBroker::new());
        let fetcher = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.fetch("t", "g").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.publish("t", vec![b"hello".to_vec()]).await.unwrap();

        let message = fetcher.await.unwrap().unwrap();
        assert_eq!(message.offset, 0);
        assert_eq!(message.value, b"hello");
    }

    #[tokio::test]
    async fn test_uncommitted_message_is_redelivered() {
        let broker = MemoryBroker::new();
        broker.publish("t", vec![b"a".to_vec(), b"b".to_vec()]).await.unwrap();

        assert_eq!(broker.fetch("t", "g").await.unwrap().offset, 0);
        assert_eq!(broker.fetch("t", "g").await.unwrap().offset, 0);
        broker.commit("t", "g", 0).await.unwrap();
        assert_eq!(broker.fetch("t", "g").await.unwrap().offset, 1);
        assert_eq!(broker.fetch("t", "other").await.unwrap().offset, 0);
        assert_eq!(broker.committed("t", "g"), Some(0));
        assert_eq!(broker.committed("t", "other"), None);
    }

    #[tokio::test]
    async fn test_close_wakes_fetchers() {
        let broker = Arc::new(MemoryBroker::new());
        let fetcher = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.fetch("t", "g").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.close().await.unwrap();
        assert!(matches!(fetcher.await.unwrap(), Err(QueueError::Closed)));
        assert!(matches!(broker.publish("t", vec![]).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_commit_unknown_topic() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.commit("nope", "g", 0).await,
            Err(QueueError::UnknownTopic(_))
        ));
    }
}
