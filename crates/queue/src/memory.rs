//! In-process queue with the same receive/delete semantics as Azure Storage
//! queues: received messages are hidden for the visibility timeout and can
//! only be deleted with the pop receipt of their latest receive.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

struct StoredMessage {
    id: String,
    body: String,
    inserted: DateTime<Utc>,
    dequeue_count: u32,
    pop_receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| now >= until)
    }
}

#[derive(Default)]
struct Inner {
    messages: Vec<StoredMessage>,
    unavailable: bool,
}

/// Memory-backed [`QueueConsumer`].
pub struct MemoryQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Enqueue a message synchronously, returning its id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.lock();
        inner.messages.push(StoredMessage {
            id: id.clone(),
            body: body.into(),
            inserted: Utc::now(),
            dequeue_count: 0,
            pop_receipt: None,
            invisible_until: None,
        });
        id
    }

    /// Number of messages still in the queue, visible or not.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every message visible again, as if their timeouts had expired.
    pub fn expire_visibility(&self) {
        for msg in self.lock().messages.iter_mut() {
            msg.invisible_until = None;
        }
    }

    /// Simulate a backend outage: every call fails with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self, inner: &Inner) -> Result<(), QueueError> {
        if inner.unavailable {
            return Err(QueueError::Connection(format!(
                "memory queue '{}' is unavailable",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_batch(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut inner = self.lock();
        self.check_available(&inner)?;

        let now = Instant::now();
        let mut received = Vec::new();
        for msg in inner.messages.iter_mut() {
            if received.len() >= max_messages as usize {
                break;
            }
            if !msg.is_visible(now) {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            msg.pop_receipt = Some(receipt.clone());
            msg.invisible_until = Some(now + visibility_timeout);
            msg.dequeue_count += 1;
            received.push(QueueMessage {
                id: msg.id.clone(),
                body: msg.body.clone(),
                receipt_handle: receipt,
                timestamp: msg.inserted,
                attempt_count: msg.dequeue_count,
            });
        }
        Ok(received)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut inner = self.lock();
        self.check_available(&inner)?;

        let position = inner
            .messages
            .iter()
            .position(|m| m.id == message.id)
            .ok_or_else(|| QueueError::NotFound(message.id.clone()))?;
        if inner.messages[position].pop_receipt.as_deref() != Some(message.receipt_handle.as_str()) {
            return Err(QueueError::Ack(format!(
                "pop receipt mismatch for message {}",
                message.id
            )));
        }
        inner.messages.remove(position);
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        self.check_available(&self.lock())?;
        self.push(body);
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let inner = self.lock();
        self.check_available(&inner)?;
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(inner.messages.len() as u64),
            provider: "memory".to_string(),
        })
    }
}
