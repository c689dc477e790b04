//! Parse ingestion status message bodies into [`IngestionAck`]s.
//!
//! ADX writes one JSON object per status message, base64-encoded. Bodies that
//! are not base64 are read as plain JSON so hand-fed queues work too.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Acknowledgement of one ingestion, from either the success or the failure
/// status queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestionAck {
    /// Client-generated id of the ingestion this message reports on.
    pub ingestion_source_id: String,
    #[serde(default)]
    pub ingestion_source_path: Option<String>,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub succeeded_on: Option<String>,
    #[serde(default)]
    pub failed_on: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub failure_status: Option<String>,
    #[serde(default)]
    pub should_retry: Option<bool>,
}

/// Decode a message body: base64 JSON when it decodes to a JSON object,
/// the raw body otherwise.
fn decode_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }
    match STANDARD.decode(trimmed) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| trimmed.to_string()),
        Err(_) => trimmed.to_string(),
    }
}

/// Parse a single status message.
///
/// Rejects bodies that are not JSON objects or that lack a non-empty
/// `IngestionSourceId`.
pub fn parse_ack(msg: &QueueMessage) -> Result<IngestionAck, QueueError> {
    let decoded = decode_body(&msg.body);
    let ack: IngestionAck = serde_json::from_str(&decoded)
        .map_err(|e| QueueError::Parse(format!("message {}: {}", msg.id, e)))?;
    if ack.ingestion_source_id.trim().is_empty() {
        return Err(QueueError::Parse(format!(
            "message {}: empty IngestionSourceId",
            msg.id
        )));
    }
    Ok(ack)
}

/// Parse a batch of messages, pairing each good message with its ack.
///
/// Malformed messages are logged and dropped from the result; they stay in
/// their queue untouched.
pub fn parse_batch(messages: &[QueueMessage]) -> Vec<(&QueueMessage, IngestionAck)> {
    messages
        .iter()
        .filter_map(|msg| match parse_ack(msg) {
            Ok(ack) => Some((msg, ack)),
            Err(e) => {
                debug!(message_id = %msg.id, error = %e, "Skipping unparseable status message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_msg(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            body: body.to_string(),
            receipt_handle: "pop-test".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        }
    }

    #[test]
    fn test_parse_base64_success_message() {
        let json = r#"{"OperationId":"op-1","Database":"db","Table":"Customers","SucceededOn":"2024-05-01T10:00:00Z","IngestionSourceId":"abc","IngestionSourcePath":"https://x/blob"}"#;
        let msg = make_msg("m-1", &STANDARD.encode(json));
        let ack = parse_ack(&msg).unwrap();

        assert_eq!(ack.ingestion_source_id, "abc");
        assert_eq!(ack.table.as_deref(), Some("Customers"));
        assert_eq!(ack.succeeded_on.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert!(ack.details.is_none());
    }

    #[test]
    fn test_parse_plain_failure_message() {
        let body = r#"{
            "IngestionSourceId": "def",
            "FailedOn": "2024-05-01T10:00:00Z",
            "Details": "Stream_InputStreamTooLarge",
            "ErrorCode": "BadRequest_FileTooLarge",
            "FailureStatus": "Permanent",
            "ShouldRetry": false
        }"#;
        let ack = parse_ack(&make_msg("m-2", body)).unwrap();

        assert_eq!(ack.ingestion_source_id, "def");
        assert_eq!(ack.error_code.as_deref(), Some("BadRequest_FileTooLarge"));
        assert_eq!(ack.failure_status.as_deref(), Some("Permanent"));
        assert_eq!(ack.should_retry, Some(false));
    }

    #[test]
    fn test_missing_source_id_is_rejected() {
        let err = parse_ack(&make_msg("m-3", r#"{"Table":"T"}"#)).unwrap_err();
        assert!(matches!(err, QueueError::Parse(_)));
        assert!(err.to_string().contains("m-3"));
    }

    #[test]
    fn test_empty_source_id_is_rejected() {
        let err = parse_ack(&make_msg("m-4", r#"{"IngestionSourceId":"  "}"#)).unwrap_err();
        assert!(err.to_string().contains("empty IngestionSourceId"));
    }

    #[test]
    fn test_garbage_body_is_rejected() {
        assert!(parse_ack(&make_msg("m-5", "not json at all")).is_err());
        assert!(parse_ack(&make_msg("m-6", &STANDARD.encode("[1,2,3]"))).is_err());
    }

    #[test]
    fn test_parse_batch_skips_bad_messages() {
        let messages = vec![
            make_msg("good-1", r#"{"IngestionSourceId":"a"}"#),
            make_msg("bad-1", "garbage"),
            make_msg("good-2", &STANDARD.encode(r#"{"IngestionSourceId":"b"}"#)),
            make_msg("bad-2", r#"{"Database":"db"}"#),
        ];

        let parsed = parse_batch(&messages);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0.id, "good-1");
        assert_eq!(parsed[0].1.ingestion_source_id, "a");
        assert_eq!(parsed[1].0.id, "good-2");
        assert_eq!(parsed[1].1.ingestion_source_id, "b");
    }
}
