//! End-to-end reconciliation against in-memory status queues.

use std::sync::Arc;

use chrono::{Duration, Utc};
use coal_ingest::{check_status, check_status_at, CheckOptions, IngestError, IngestionStatus, StatusQueues, StatusStore};
use coal_queue::{MemoryQueue, QueueError};

struct Harness {
    success: Arc<MemoryQueue>,
    failure: Arc<MemoryQueue>,
    queues: StatusQueues,
    store: StatusStore,
}

fn harness() -> Harness {
    let success = Arc::new(MemoryQueue::new("successfulingestions"));
    let failure = Arc::new(MemoryQueue::new("failedingestions"));
    let queues = StatusQueues::new(vec![success.clone()], vec![failure.clone()]);
    Harness {
        success,
        failure,
        queues,
        store: StatusStore::new(),
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn ack(id: &str) -> String {
    format!(r#"{{"IngestionSourceId":"{id}","Table":"Customers","Database":"db"}}"#)
}

// ── Timeout policy ─────────────────────────────────────────

#[tokio::test]
async fn queued_id_stays_queued_then_times_out() {
    let mut h = harness();
    let t0 = Utc::now();
    h.store.register_at("abc", IngestionStatus::Queued, t0);
    let options = CheckOptions::default();

    let early = check_status_at(&mut h.store, &h.queues, &ids(&["abc"]), &options, t0 + Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(early, vec![("abc".to_string(), IngestionStatus::Queued)]);

    let late = check_status_at(&mut h.store, &h.queues, &ids(&["abc"]), &options, t0 + Duration::seconds(901))
        .await
        .unwrap();
    assert_eq!(late, vec![("abc".to_string(), IngestionStatus::Timeout)]);

    // A late acknowledgement cannot revive a timed-out id.
    h.success.push(ack("abc"));
    let after = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &options)
        .await
        .unwrap();
    assert_eq!(after[0].1, IngestionStatus::Timeout);
    assert_eq!(h.success.len(), 1);
}

// ── Matching ───────────────────────────────────────────────

#[tokio::test]
async fn success_message_resolves_and_is_deleted() {
    let mut h = harness();
    h.store.register_queued("abc");
    h.success.push(ack("abc"));

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses, vec![("abc".to_string(), IngestionStatus::Success)]);
    assert!(h.success.is_empty());
}

#[tokio::test]
async fn base64_failure_message_resolves_to_failure() {
    use base64::Engine;
    let mut h = harness();
    h.store.register_queued("abc");
    let body = base64::engine::general_purpose::STANDARD.encode(
        r#"{"IngestionSourceId":"abc","Details":"Stream_WrongNumberOfFields","ErrorCode":"BadRequest","FailureStatus":"Permanent"}"#,
    );
    h.failure.push(body);

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses[0].1, IngestionStatus::Failure);
    assert!(h.failure.is_empty());
}

#[tokio::test]
async fn terminal_status_is_never_overwritten() {
    let mut h = harness();
    h.store.register_queued("abc");
    h.success.push(ack("abc"));
    let options = CheckOptions::default();

    check_status(&mut h.store, &h.queues, &ids(&["abc"]), &options)
        .await
        .unwrap();
    h.failure.push(ack("abc"));
    let again = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &options)
        .await
        .unwrap();

    assert_eq!(again[0].1, IngestionStatus::Success);
    assert_eq!(h.failure.len(), 1);
}

#[tokio::test]
async fn unseen_ids_are_unknown_and_leave_messages_alone() {
    let mut h = harness();
    h.success.push(ack("ghost"));

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["ghost"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses, vec![("ghost".to_string(), IngestionStatus::Unknown)]);
    assert_eq!(h.success.len(), 1);
    assert_eq!(h.store.get("ghost").unwrap().status, IngestionStatus::Unknown);
}

#[tokio::test]
async fn ids_outside_the_call_are_not_touched() {
    let mut h = harness();
    h.store.register_queued("abc");
    h.store.register_queued("other");
    h.success.push(ack("other"));

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses, vec![("abc".to_string(), IngestionStatus::Queued)]);
    assert_eq!(h.store.get("other").unwrap().status, IngestionStatus::Queued);
    assert_eq!(h.success.len(), 1);
}

#[tokio::test]
async fn malformed_messages_are_skipped() {
    let mut h = harness();
    h.store.register_queued("abc");
    h.success.push("not json at all");
    h.success.push(r#"{"Table":"no id"}"#);
    h.success.push(ack("abc"));

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses[0].1, IngestionStatus::Success);
    assert_eq!(h.success.len(), 2);
}

#[tokio::test]
async fn mixed_batch_reports_in_request_order() {
    let mut h = harness();
    for id in ["a", "b", "c"] {
        h.store.register_queued(id);
    }
    h.failure.push(ack("c"));
    h.success.push(ack("a"));

    let statuses = check_status(
        &mut h.store,
        &h.queues,
        &ids(&["c", "b", "a", "c", "new"]),
        &CheckOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        statuses,
        vec![
            ("c".to_string(), IngestionStatus::Failure),
            ("b".to_string(), IngestionStatus::Queued),
            ("a".to_string(), IngestionStatus::Success),
            ("new".to_string(), IngestionStatus::Unknown),
        ]
    );
}

#[tokio::test]
async fn every_physical_queue_is_drained_in_order() {
    let s1 = Arc::new(MemoryQueue::new("success-1"));
    let s2 = Arc::new(MemoryQueue::new("success-2"));
    let f1 = Arc::new(MemoryQueue::new("failed-1"));
    let f2 = Arc::new(MemoryQueue::new("failed-2"));
    s1.push(ack("x"));
    s1.push(ack("a"));
    s2.push(ack("b"));
    f2.push(ack("c"));
    let queues = StatusQueues::new(
        vec![s1.clone(), s2.clone()],
        vec![f1.clone(), f2.clone()],
    );
    let mut store = StatusStore::new();
    for id in ["a", "b", "c"] {
        store.register_queued(id);
    }

    let statuses = check_status(&mut store, &queues, &ids(&["a", "b", "c"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(
        statuses,
        vec![
            ("a".to_string(), IngestionStatus::Success),
            ("b".to_string(), IngestionStatus::Success),
            ("c".to_string(), IngestionStatus::Failure),
        ]
    );
    // The message for "x" matched nothing and stays in the first queue.
    assert_eq!(s1.len(), 1);
    assert!(s2.is_empty());
    assert!(f1.is_empty());
    assert!(f2.is_empty());
}

// ── Errors ─────────────────────────────────────────────────

#[tokio::test]
async fn unavailable_queue_propagates_and_keeps_store() {
    let mut h = harness();
    h.store.register_queued("abc");
    h.success.set_unavailable(true);

    let err = check_status(&mut h.store, &h.queues, &ids(&["abc"]), &CheckOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Queue(QueueError::Connection(_))));
    assert_eq!(h.store.get("abc").unwrap().status, IngestionStatus::Queued);
}

#[tokio::test]
async fn nothing_pending_means_no_polling() {
    let mut h = harness();
    h.success.set_unavailable(true);
    h.failure.set_unavailable(true);

    let statuses = check_status(&mut h.store, &h.queues, &ids(&["fresh"]), &CheckOptions::default())
        .await
        .unwrap();

    assert_eq!(statuses[0].1, IngestionStatus::Unknown);
}
