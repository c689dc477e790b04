//! Queue consumer trait and types.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body as stored in the queue (may be base64).
    pub body: String,
    /// Handle required to delete the message (Azure pop receipt).
    /// Changes every time the message is received.
    pub receipt_handle: String,
    /// When the message was inserted into the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been dequeued.
    pub attempt_count: u32,
}

/// Health status of a queue connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    /// Whether the queue is reachable.
    pub connected: bool,
    /// Approximate number of messages waiting in the queue.
    pub approximate_message_count: Option<u64>,
    /// Queue provider name (e.g., "azure", "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, messages: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.provider
        )
    }
}

/// Trait for queue backends.
///
/// Polling never long-polls: a call returns whatever is visible right now.
/// Received messages stay in the queue, hidden for the visibility timeout,
/// until [`QueueConsumer::ack`] deletes them.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Short name used in logs (usually the queue name).
    fn name(&self) -> &str;

    /// Receive up to `max_messages` visible messages, hiding them from other
    /// consumers for `visibility_timeout`.
    ///
    /// Returns an empty vec if no messages are available.
    async fn poll_batch(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a received message from the queue.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Enqueue a new message with the given body.
    async fn send(&self, body: &str) -> Result<(), QueueError>;

    /// Check queue connectivity and return health status.
    async fn health_check(&self) -> Result<QueueHealth, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_health_display() {
        let health = QueueHealth {
            connected: true,
            approximate_message_count: Some(42),
            provider: "azure".to_string(),
        };
        let display = format!("{}", health);
        assert!(display.contains("connected: true"));
        assert!(display.contains("42"));
        assert!(display.contains("azure"));
    }
}
