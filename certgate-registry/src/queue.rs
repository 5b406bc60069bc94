//! Change-notification queue (feeds C7). Abstracted the way §6 treats the
//! message queue: opaque messages that the watcher long-polls for, acts on,
//! and deletes unconditionally whether or not they parsed.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::error::Result;

/// One queued notification. `receipt` stands in for a queue-specific
/// delete handle (e.g. an SQS receipt handle); `body` is the opaque
/// message payload the watcher will try to parse.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

/// Long-poll receive + unconditional delete, matching the original
/// watcher's loop: receive with a wait timeout, process whatever came
/// back (or nothing), delete every received message regardless of
/// whether it parsed.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Waits up to `wait` for at least one message, returning whatever
    /// arrived (possibly empty on timeout).
    async fn receive(&self, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Deletes a message by receipt handle. Called unconditionally after
    /// an attempt to process it, parse failures included.
    async fn delete(&self, receipt: &str) -> Result<()>;
}

/// In-memory queue for tests: `push` enqueues a message as an external
/// producer would; `receive` drains what's present without actually
/// blocking for `wait` (tests don't need to pay for real long-polling).
#[derive(Default)]
pub struct InMemoryMessageQueue {
    messages: Mutex<VecDeque<QueueMessage>>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, body: impl Into<String>) {
        let receipt = uuid::Uuid::new_v4().to_string();
        self.messages.lock().await.push_back(QueueMessage {
            receipt,
            body: body.into(),
        });
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn receive(&self, _wait: Duration) -> Result<Vec<QueueMessage>> {
        let mut guard = self.messages.lock().await;
        Ok(guard.drain(..).collect())
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.messages.lock().await.retain(|m| m.receipt != receipt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_receive_then_delete() {
        let queue = InMemoryMessageQueue::new();
        queue.push("refresh").await;
        assert_eq!(queue.len().await, 1);

        let received = queue.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "refresh");

        queue.delete(&received[0].receipt).await.unwrap();
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn receive_on_empty_queue_returns_empty() {
        let queue = InMemoryMessageQueue::new();
        let received = queue.receive(Duration::from_millis(10)).await.unwrap();
        assert!(received.is_empty());
    }
}
