use thiserror::Error;

use coal_queue::QueueError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] coal_core::CoalError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("kusto returned {status}: {body}")]
    Kusto { status: u16, body: String },

    #[error("unexpected kusto response: {0}")]
    KustoResponse(String),

    #[error("no {0} available in ingestion resources")]
    MissingResource(&'static str),

    #[error("invalid uri {0}")]
    InvalidUri(String),

    #[error("invalid tag '{0}': quotes and backslashes are not allowed")]
    InvalidTag(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}
