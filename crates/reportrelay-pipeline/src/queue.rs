//! Queue seam. One queue per pipeline stage; delivery is at-least-once and
//! the queue is the only synchronization primitive between stages.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Minimal queue client: enqueue only. Consumption is wired externally.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn send(&self, queue_name: &str, message: &str) -> Result<()>;
}

/// In-memory queue recording sends for tests; messages can be drained and
/// fed back through the dispatcher to simulate the queue loop.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<(String, String)>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all queued messages as `(queue, body)` pairs.
    pub async fn drain(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.messages.lock().await)
    }

    /// Messages currently sitting on one queue.
    pub async fn queued_on(&self, queue_name: &str) -> Vec<String> {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(q, _)| q == queue_name)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn send(&self, queue_name: &str, message: &str) -> Result<()> {
        self.messages
            .lock()
            .await
            .push((queue_name.to_string(), message.to_string()));
        Ok(())
    }
}
