//! Reconcile ingestion acknowledgements against tracked source ids.
//!
//! One [`check_status`] call:
//! 1. registers unseen ids as `UNKNOWN` and answers terminal ids directly,
//! 2. drains one batch from every success queue, then every failure queue,
//!    moving matched ids to `SUCCESS`/`FAILURE` and deleting their messages,
//! 3. times out ids still pending past `timeout`,
//! 4. returns one `(id, status)` pair per distinct requested id.
//!
//! Every message drawn from a queue is examined. Messages for ids that are
//! not pending in this call are left in their queue for whoever owns them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use coal_core::config::MonitorConfig;
use coal_queue::{parse_batch, QueueConsumer};

use crate::error::IngestError;
use crate::status::{IngestionStatus, StatusStore};

/// The two logical status queues. ADX spreads each over several physical
/// queues (one per storage account).
#[derive(Clone, Default)]
pub struct StatusQueues {
    pub success: Vec<Arc<dyn QueueConsumer>>,
    pub failure: Vec<Arc<dyn QueueConsumer>>,
}

impl StatusQueues {
    pub fn new(
        success: Vec<Arc<dyn QueueConsumer>>,
        failure: Vec<Arc<dyn QueueConsumer>>,
    ) -> Self {
        Self { success, failure }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Pending ids older than this become `TIMEOUT`.
    pub timeout: Duration,
    /// Messages drawn per physical queue per call.
    pub max_messages: u32,
    /// How long drawn-but-unmatched messages stay hidden from other pollers.
    pub visibility_timeout: Duration,
    /// Log every status transition at info level.
    pub logs: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for CheckOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_messages: config.max_messages,
            visibility_timeout: config.visibility_timeout(),
            logs: false,
        }
    }
}

/// Report the status of `ids`, polling the status queues for the pending ones.
///
/// Queue receive errors propagate; the store keeps whatever was resolved
/// before the failure.
pub async fn check_status(
    store: &mut StatusStore,
    queues: &StatusQueues,
    ids: &[String],
    options: &CheckOptions,
) -> Result<Vec<(String, IngestionStatus)>, IngestError> {
    check_status_at(store, queues, ids, options, Utc::now()).await
}

/// [`check_status`] with an explicit clock.
pub async fn check_status_at(
    store: &mut StatusStore,
    queues: &StatusQueues,
    ids: &[String],
    options: &CheckOptions,
    now: DateTime<Utc>,
) -> Result<Vec<(String, IngestionStatus)>, IngestError> {
    let mut seen = HashSet::new();
    let mut requested = Vec::new();
    let mut pending = HashSet::new();

    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        requested.push(id.clone());
        match store.get(id).map(|entry| entry.status) {
            // First sighting: reported UNKNOWN now, matched from the next call on.
            None => {
                store.register_at(id, IngestionStatus::Unknown, now);
            }
            Some(status) if status.is_terminal() => {}
            Some(_) => {
                pending.insert(id.clone());
            }
        }
    }

    if !pending.is_empty() {
        debug!(pending = pending.len(), "Polling ingestion status queues");
        drain_queues(store, &queues.success, IngestionStatus::Success, &mut pending, options)
            .await?;
        drain_queues(store, &queues.failure, IngestionStatus::Failure, &mut pending, options)
            .await?;
        apply_timeout(store, &pending, options.timeout, now);
    }

    Ok(requested
        .into_iter()
        .map(|id| {
            let status = store
                .get(&id)
                .map(|entry| entry.status)
                .unwrap_or(IngestionStatus::Unknown);
            (id, status)
        })
        .collect())
}

/// Draw one batch from each queue and resolve the pending ids it mentions.
async fn drain_queues(
    store: &mut StatusStore,
    queues: &[Arc<dyn QueueConsumer>],
    outcome: IngestionStatus,
    pending: &mut HashSet<String>,
    options: &CheckOptions,
) -> Result<(), IngestError> {
    for queue in queues {
        if pending.is_empty() {
            return Ok(());
        }
        let messages = queue
            .poll_batch(options.max_messages, options.visibility_timeout)
            .await?;

        for (message, ack) in parse_batch(&messages) {
            let id = ack.ingestion_source_id.as_str();
            if !pending.remove(id) {
                continue;
            }
            store.set(id, outcome);

            match outcome {
                IngestionStatus::Failure => error!(
                    source_id = %id,
                    table = ack.table.as_deref().unwrap_or("-"),
                    error_code = ack.error_code.as_deref().unwrap_or("-"),
                    details = ack.details.as_deref().unwrap_or("-"),
                    "Ingestion failed"
                ),
                _ if options.logs => info!(
                    source_id = %id,
                    table = ack.table.as_deref().unwrap_or("-"),
                    status = %outcome,
                    "Ingestion status resolved"
                ),
                _ => debug!(source_id = %id, status = %outcome, "Ingestion status resolved"),
            }

            if let Err(e) = queue.ack(message).await {
                warn!(
                    queue = queue.name(),
                    message_id = %message.id,
                    error = %e,
                    "Failed to delete status message"
                );
            }
        }
    }
    Ok(())
}

fn apply_timeout(
    store: &mut StatusStore,
    pending: &HashSet<String>,
    timeout: Duration,
    now: DateTime<Utc>,
) {
    for id in pending {
        let Some(entry) = store.get(id) else {
            continue;
        };
        let elapsed = (now - entry.first_seen).to_std().unwrap_or(Duration::ZERO);
        if elapsed > timeout && store.set(id, IngestionStatus::Timeout) {
            warn!(
                source_id = %id,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = timeout.as_secs(),
                "Ingestion timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coal_queue::MemoryQueue;

    fn ack_body(id: &str) -> String {
        format!(r#"{{"IngestionSourceId":"{id}","Table":"T"}}"#)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn queues_with(success: Arc<MemoryQueue>, failure: Arc<MemoryQueue>) -> StatusQueues {
        StatusQueues::new(vec![success], vec![failure])
    }

    #[tokio::test]
    async fn duplicate_ids_reported_once_in_first_occurrence_order() {
        let mut store = StatusStore::new();
        store.register_queued("b");
        let queues = StatusQueues::default();

        let result = check_status(&mut store, &queues, &ids(&["b", "a", "b", "a"]), &CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(
            result,
            vec![
                ("b".to_string(), IngestionStatus::Queued),
                ("a".to_string(), IngestionStatus::Unknown),
            ]
        );
    }

    #[tokio::test]
    async fn all_matching_messages_in_a_batch_are_processed() {
        let success = Arc::new(MemoryQueue::new("success"));
        let failure = Arc::new(MemoryQueue::new("failure"));
        success.push(ack_body("a"));
        success.push(ack_body("b"));
        failure.push(ack_body("c"));

        let mut store = StatusStore::new();
        for id in ["a", "b", "c"] {
            store.register_queued(id);
        }
        let queues = queues_with(success.clone(), failure.clone());

        let result = check_status(&mut store, &queues, &ids(&["a", "b", "c"]), &CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(result[0].1, IngestionStatus::Success);
        assert_eq!(result[1].1, IngestionStatus::Success);
        assert_eq!(result[2].1, IngestionStatus::Failure);
        assert!(success.is_empty());
        assert!(failure.is_empty());
    }

    #[tokio::test]
    async fn success_wins_when_both_queues_mention_an_id() {
        let success = Arc::new(MemoryQueue::new("success"));
        let failure = Arc::new(MemoryQueue::new("failure"));
        success.push(ack_body("a"));
        failure.push(ack_body("a"));

        let mut store = StatusStore::new();
        store.register_queued("a");
        let queues = queues_with(success.clone(), failure.clone());

        let result = check_status(&mut store, &queues, &ids(&["a"]), &CheckOptions::default())
            .await
            .unwrap();

        assert_eq!(result[0].1, IngestionStatus::Success);
        assert!(success.is_empty());
        // The failure message was never matched, so it stays queued.
        assert_eq!(failure.len(), 1);
    }

    #[tokio::test]
    async fn failure_queues_not_polled_once_everything_resolved() {
        let success = Arc::new(MemoryQueue::new("success"));
        let failure = Arc::new(MemoryQueue::new("failure"));
        success.push(ack_body("a"));
        failure.set_unavailable(true);

        let mut store = StatusStore::new();
        store.register_queued("a");
        let queues = queues_with(success, failure);

        let result = check_status(&mut store, &queues, &ids(&["a"]), &CheckOptions::default())
            .await
            .unwrap();
        assert_eq!(result[0].1, IngestionStatus::Success);
    }

    #[tokio::test]
    async fn timeout_applies_only_past_the_deadline() {
        let mut store = StatusStore::new();
        let t0 = Utc::now();
        store.register_at("a", IngestionStatus::Queued, t0);
        let queues = StatusQueues::default();
        let options = CheckOptions {
            timeout: Duration::from_secs(5),
            ..CheckOptions::default()
        };

        let at_deadline = t0 + chrono::Duration::seconds(5);
        let result = check_status_at(&mut store, &queues, &ids(&["a"]), &options, at_deadline)
            .await
            .unwrap();
        assert_eq!(result[0].1, IngestionStatus::Queued);

        let past = t0 + chrono::Duration::seconds(6);
        let result = check_status_at(&mut store, &queues, &ids(&["a"]), &options, past)
            .await
            .unwrap();
        assert_eq!(result[0].1, IngestionStatus::Timeout);
    }
}
