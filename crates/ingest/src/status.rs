//! Ingestion status bookkeeping.
//!
//! [`StatusStore`] maps ingestion source ids to their latest known status.
//! It is an explicit object owned by the caller, never a global, and it only
//! grows: entries are kept for the life of the store.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one queued ingestion.
///
/// ```text
/// QUEUED  ──(success ack)──> SUCCESS
/// QUEUED  ──(failure ack)──> FAILURE
/// QUEUED  ──(timed out)────> TIMEOUT
/// UNKNOWN ── same transitions as QUEUED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestionStatus {
    /// Submitted by this process, no acknowledgement yet.
    Queued,
    Success,
    Failure,
    Timeout,
    /// Queried before this process ever registered it.
    Unknown,
}

impl IngestionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: String,
    pub status: IngestionStatus,
    /// When this process first saw the id; the timeout counts from here.
    pub first_seen: DateTime<Utc>,
}

/// Process-scoped map of source id → [`StatusEntry`].
#[derive(Debug, Default)]
pub struct StatusStore {
    entries: HashMap<String, StatusEntry>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&StatusEntry> {
        self.entries.get(id)
    }

    /// Move an entry to `status`.
    ///
    /// Returns `false`, leaving the store untouched, when the id is not
    /// registered or its status is already terminal.
    pub fn set(&mut self, id: &str, status: IngestionStatus) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if !entry.status.is_terminal() => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    /// Register an id queried before it was ingested: `UNKNOWN`, seen now.
    /// Existing entries are returned unchanged.
    pub fn register_if_absent(&mut self, id: &str) -> &StatusEntry {
        self.register_at(id, IngestionStatus::Unknown, Utc::now())
    }

    /// Register an id right after its ingestion was submitted.
    pub fn register_queued(&mut self, id: &str) -> &StatusEntry {
        self.register_at(id, IngestionStatus::Queued, Utc::now())
    }

    /// Register an id with an explicit status and first-seen time, unless it
    /// is already present.
    pub fn register_at(
        &mut self,
        id: &str,
        status: IngestionStatus,
        first_seen: DateTime<Utc>,
    ) -> &StatusEntry {
        self.entries
            .entry(id.to_string())
            .or_insert_with(|| StatusEntry {
                id: id.to_string(),
                status,
                first_seen,
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!IngestionStatus::Queued.is_terminal());
        assert!(!IngestionStatus::Unknown.is_terminal());
        assert!(IngestionStatus::Success.is_terminal());
        assert!(IngestionStatus::Failure.is_terminal());
        assert!(IngestionStatus::Timeout.is_terminal());
    }

    #[test]
    fn register_if_absent_keeps_existing_entry() {
        let mut store = StatusStore::new();
        let queued_at = store.register_queued("abc").first_seen;

        let entry = store.register_if_absent("abc");
        assert_eq!(entry.status, IngestionStatus::Queued);
        assert_eq!(entry.first_seen, queued_at);

        assert_eq!(store.register_if_absent("new").status, IngestionStatus::Unknown);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn set_never_overwrites_terminal_status() {
        let mut store = StatusStore::new();
        store.register_queued("abc");

        assert!(store.set("abc", IngestionStatus::Success));
        assert!(!store.set("abc", IngestionStatus::Failure));
        assert!(!store.set("abc", IngestionStatus::Timeout));
        assert_eq!(store.get("abc").unwrap().status, IngestionStatus::Success);
    }

    #[test]
    fn set_ignores_unregistered_ids() {
        let mut store = StatusStore::new();
        assert!(!store.set("ghost", IngestionStatus::Success));
        assert!(store.get("ghost").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn status_display_is_upper_case() {
        assert_eq!(IngestionStatus::Timeout.to_string(), "TIMEOUT");
        assert_eq!(
            serde_json::to_string(&IngestionStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
    }
}
