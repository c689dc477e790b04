//! Azure Storage Queue consumer over the REST API.
//!
//! ADX hands out queues as SAS URIs
//! (`https://{account}.queue.core.windows.net/{queue}?sv=...&sig=...`), so no
//! account key or AAD token is needed: the SAS query string is appended to
//! every request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;

/// Azure caps a single receive at 32 messages.
const MAX_MESSAGES_PER_RECEIVE: u32 = 32;

const API_VERSION: &str = "2021-08-06";

#[derive(Debug, Deserialize)]
struct QueueMessagesList {
    #[serde(rename = "QueueMessage", default)]
    messages: Vec<RawQueueMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawQueueMessage {
    message_id: String,
    #[serde(default)]
    insertion_time: Option<String>,
    pop_receipt: String,
    #[serde(default)]
    dequeue_count: Option<u32>,
    #[serde(default)]
    message_text: String,
}

impl RawQueueMessage {
    fn into_message(self) -> QueueMessage {
        // InsertionTime is RFC 1123, e.g. "Fri, 09 Oct 2009 21:04:30 GMT".
        let timestamp = self
            .insertion_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        QueueMessage {
            id: self.message_id,
            body: self.message_text,
            receipt_handle: self.pop_receipt,
            timestamp,
            attempt_count: self.dequeue_count.unwrap_or(1),
        }
    }
}

/// Parse the body of a "Get Messages" response.
fn parse_messages_xml(xml: &str) -> Result<Vec<QueueMessage>, QueueError> {
    if xml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: QueueMessagesList = quick_xml::de::from_str(xml)
        .map_err(|e| QueueError::Parse(format!("invalid queue XML: {e}")))?;
    Ok(list
        .messages
        .into_iter()
        .map(RawQueueMessage::into_message)
        .collect())
}

/// Queue consumer for one Azure Storage queue addressed by a SAS URI.
pub struct AzureQueueConsumer {
    client: Client,
    name: String,
    /// Queue URL without the query string.
    base_url: String,
    /// SAS token (query string without the leading `?`), possibly empty.
    sas: String,
}

impl AzureQueueConsumer {
    /// Build a consumer from a queue SAS URI.
    pub fn from_sas_uri(client: Client, uri: &str) -> Result<Self, QueueError> {
        let parsed = Url::parse(uri).map_err(|e| QueueError::InvalidUri(format!("{uri}: {e}")))?;
        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| QueueError::InvalidUri(format!("{uri}: no queue name in path")))?
            .to_string();
        let sas = parsed.query().unwrap_or("").to_string();

        let mut base = parsed.clone();
        base.set_query(None);
        let base_url = base.as_str().trim_end_matches('/').to_string();

        info!(queue = %name, "Azure queue consumer initialized");

        Ok(Self {
            client,
            name,
            base_url,
            sas,
        })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!("{}{}", self.base_url, path);
        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if !self.sas.is_empty() {
            query.push(self.sas.clone());
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    fn connection_error(&self, action: &str, e: reqwest::Error) -> QueueError {
        QueueError::Connection(format!("{} {} failed: {e}", self.name, action))
    }
}

/// Map a non-success response to a queue error.
async fn status_error(
    queue: &str,
    action: &str,
    resp: reqwest::Response,
) -> QueueError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail = format!("{queue} {action} returned {status}: {body}");
    match status {
        StatusCode::NOT_FOUND => QueueError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => QueueError::Auth(detail),
        _ => QueueError::Connection(detail),
    }
}

/// Percent-encode a pop receipt for use in a query string.
fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[async_trait]
impl QueueConsumer for AzureQueueConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_batch(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let capped = max_messages.clamp(1, MAX_MESSAGES_PER_RECEIVE);
        // Azure rejects a visibility timeout below one second.
        let visibility = visibility_timeout.as_secs().max(1);

        debug!(queue = %self.name, max_messages = capped, visibility, "Polling Azure queue");

        let url = self.url(
            "/messages",
            &[
                ("numofmessages", capped.to_string()),
                ("visibilitytimeout", visibility.to_string()),
            ],
        );
        let resp = self
            .client
            .get(&url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| self.connection_error("receive", e))?;

        if !resp.status().is_success() {
            return Err(status_error(&self.name, "receive", resp).await);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.connection_error("receive", e))?;
        let messages = parse_messages_xml(&body)?;
        debug!(queue = %self.name, count = messages.len(), "Received Azure queue messages");
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        debug!(queue = %self.name, message_id = %message.id, "Deleting Azure queue message");

        let url = self.url(
            &format!("/messages/{}", message.id),
            &[("popreceipt", encode_query_value(&message.receipt_handle))],
        );
        let resp = self
            .client
            .delete(&url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("{} delete failed: {e}", self.name)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(QueueError::Ack(format!(
                "{} delete returned {status}: {body}",
                self.name
            )));
        }
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let url = self.url("/messages", &[]);
        let payload = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            quick_xml::escape::escape(body)
        );
        let resp = self
            .client
            .post(&url)
            .header("x-ms-version", API_VERSION)
            .header("Content-Type", "application/xml")
            .body(payload)
            .send()
            .await
            .map_err(|e| QueueError::Send(format!("{} send failed: {e}", self.name)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(QueueError::Send(format!(
                "{} send returned {status}: {text}",
                self.name
            )));
        }
        debug!(queue = %self.name, "Message enqueued");
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let url = self.url("", &[("comp", "metadata".to_string())]);
        let resp = self
            .client
            .get(&url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|e| self.connection_error("health check", e))?;

        if !resp.status().is_success() {
            return Err(status_error(&self.name, "health check", resp).await);
        }

        let count = resp
            .headers()
            .get("x-ms-approximate-messages-count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "azure".to_string(),
        })
    }
}
