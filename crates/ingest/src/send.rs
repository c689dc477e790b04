//! Send a whole Store to ADX and optionally wait for the outcome.

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::IngestError;
use crate::ingestor::{IngestionProperties, Ingestor};
use crate::kusto::validate_tag;
use crate::monitor::{wait_for_ingestion, WaitSettings};
use crate::reconciler::StatusQueues;
use crate::rollback::{rollback_by_tag, TagDropper};
use crate::status::{IngestionStatus, StatusStore};
use crate::store::{Store, StoreTable};

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub database: String,
    /// Drop-by tag for every extent of this send. Generated when absent.
    pub tag: Option<String>,
    /// Wait for acknowledgements after submitting.
    pub wait: bool,
    /// `.create-merge table` each table before ingesting it.
    pub create_tables: bool,
    pub wait_settings: WaitSettings,
}

impl SendOptions {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            tag: None,
            wait: false,
            create_tables: false,
            wait_settings: WaitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub tag: String,
    /// `(table, source id)` in submission order.
    pub submitted: Vec<(String, Uuid)>,
    /// Last known status per source id.
    pub statuses: Vec<(String, IngestionStatus)>,
    pub rolled_back: bool,
    pub inconclusive: bool,
}

impl SendReport {
    pub fn any_failure(&self) -> bool {
        self.statuses
            .iter()
            .any(|(_, status)| *status == IngestionStatus::Failure)
    }
}

/// Fresh drop-by tag for a send.
pub fn generate_tag() -> String {
    format!("coal-{}", Uuid::new_v4().simple())
}

/// Submit every table of `store`, tracking each source id as `QUEUED`.
///
/// With `options.wait` the wait loop runs over the submitted ids, and any
/// `FAILURE` rolls the whole send back by its tag. A submission error or a
/// status polling error also rolls back whatever was already submitted
/// before propagating.
pub async fn send_store(
    store: &Store,
    ingestor: &dyn Ingestor,
    queues: &StatusQueues,
    status: &mut StatusStore,
    dropper: &dyn TagDropper,
    options: &SendOptions,
) -> Result<SendReport, IngestError> {
    let tag = options.tag.clone().unwrap_or_else(generate_tag);
    validate_tag(&tag)?;

    let tables = store.tables()?;
    if tables.is_empty() {
        warn!(dir = %store.dir().display(), "Store has no tables to send");
    }
    info!(tables = tables.len(), database = %options.database, tag = %tag, "Sending store");

    let mut submitted = Vec::with_capacity(tables.len());
    for table in &tables {
        let props = IngestionProperties::new(&options.database, &table.name, table.format)
            .with_drop_by_tag(&tag);
        let result = submit_table(ingestor, table, &props, options.create_tables).await;

        match result {
            Ok(source_id) => {
                status.register_queued(&source_id.to_string());
                submitted.push((table.name.clone(), source_id));
            }
            Err(e) => {
                error!(table = %table.name, error = %e, "Failed to submit table");
                if !submitted.is_empty() {
                    rollback_by_tag(dropper, &options.database, &tag).await;
                }
                return Err(e);
            }
        }
    }

    let ids: Vec<String> = submitted.iter().map(|(_, id)| id.to_string()).collect();
    let mut report = SendReport {
        tag,
        submitted,
        statuses: ids
            .iter()
            .map(|id| (id.clone(), IngestionStatus::Queued))
            .collect(),
        rolled_back: false,
        inconclusive: false,
    };

    if !options.wait || ids.is_empty() {
        return Ok(report);
    }

    let outcome = match wait_for_ingestion(status, queues, &ids, &options.wait_settings).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(tag = %report.tag, error = %e, "Status polling failed, rolling back");
            rollback_by_tag(dropper, &options.database, &report.tag).await;
            return Err(e);
        }
    };
    report.statuses = outcome.statuses;
    report.inconclusive = outcome.inconclusive;

    if report.any_failure() {
        error!(tag = %report.tag, "Ingestion failed, rolling back");
        report.rolled_back = rollback_by_tag(dropper, &options.database, &report.tag).await;
    }
    Ok(report)
}

async fn submit_table(
    ingestor: &dyn Ingestor,
    table: &StoreTable,
    props: &IngestionProperties,
    create_table: bool,
) -> Result<Uuid, IngestError> {
    if create_table {
        ingestor.ensure_table(table, props).await?;
    }
    ingestor.ingest_table(table, props).await
}
