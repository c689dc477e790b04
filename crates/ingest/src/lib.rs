//! ADX ingestion: queued submission, status reconciliation and rollback.

pub mod credentials;
pub mod error;
pub mod ingestor;
pub mod kusto;
pub mod monitor;
pub mod reconciler;
pub mod rollback;
pub mod send;
pub mod status;
pub mod store;

pub use credentials::{AzureCredential, TokenProvider};
pub use error::IngestError;
pub use ingestor::{IngestionProperties, Ingestor, QueuedIngestor, ReportLevel};
pub use kusto::{IngestionResources, KustoClient};
pub use monitor::{wait_for_ingestion, WaitOutcome, WaitSettings};
pub use reconciler::{check_status, check_status_at, CheckOptions, StatusQueues};
pub use rollback::{rollback_by_tag, TagDropper};
pub use send::{send_store, SendOptions, SendReport};
pub use status::{IngestionStatus, StatusEntry, StatusStore};
pub use store::{DataFormat, Store, StoreTable};
