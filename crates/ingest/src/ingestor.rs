//! Queued ingestion into ADX.
//!
//! A queued ingestion is two steps: upload the file to one of the cluster's
//! temporary blob containers, then post a message describing the blob to one
//! of its ingestion queues. The message id (`Id`) is the source id that later
//! shows up in the success/failure status queues.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::ObjectStore;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;
use uuid::Uuid;

use coal_queue::{AzureQueueConsumer, QueueConsumer};

use crate::error::IngestError;
use crate::kusto::{validate_tag, IngestionResources, KustoClient};
use crate::reconciler::StatusQueues;
use crate::store::{DataFormat, StoreTable};

/// Which outcomes ADX reports to the status queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    FailuresOnly,
    DoNotReport,
    FailuresAndSuccesses,
}

impl ReportLevel {
    fn code(self) -> u8 {
        match self {
            Self::FailuresOnly => 0,
            Self::DoNotReport => 1,
            Self::FailuresAndSuccesses => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
    pub format: DataFormat,
    /// Tags written as `drop-by:{tag}`, the handle for rollback.
    pub drop_by_tags: Vec<String>,
    pub additional_tags: Vec<String>,
    /// Skip the header row (CSV).
    pub ignore_first_record: bool,
    pub flush_immediately: bool,
    pub report_level: ReportLevel,
}

impl IngestionProperties {
    pub fn new(database: &str, table: &str, format: DataFormat) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            format,
            drop_by_tags: Vec::new(),
            additional_tags: Vec::new(),
            ignore_first_record: format == DataFormat::Csv,
            flush_immediately: false,
            report_level: ReportLevel::FailuresAndSuccesses,
        }
    }

    pub fn with_drop_by_tag(mut self, tag: &str) -> Self {
        self.drop_by_tags.push(tag.to_string());
        self
    }

    /// Plain extent tag (e.g. `ingest-by:...`), not used for rollback.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.additional_tags.push(tag.to_string());
        self
    }

    pub fn with_report_level(mut self, level: ReportLevel) -> Self {
        self.report_level = level;
        self
    }

    /// Every extent tag, drop-by tags prefixed.
    pub fn tags(&self) -> Vec<String> {
        self.drop_by_tags
            .iter()
            .map(|t| format!("drop-by:{t}"))
            .chain(self.additional_tags.iter().cloned())
            .collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IngestionBlobInfo<'a> {
    id: Uuid,
    blob_path: &'a str,
    raw_data_size: u64,
    database_name: &'a str,
    table_name: &'a str,
    retain_blob_on_success: bool,
    flush_immediately: bool,
    report_level: u8,
    /// 0 = report to queue.
    report_method: u8,
    source_message_creation_time: DateTime<Utc>,
    additional_properties: BTreeMap<&'static str, String>,
}

/// Base64 JSON body of the message posted to an ingestion queue.
pub fn ingestion_message(
    source_id: Uuid,
    blob_path: &str,
    raw_data_size: u64,
    props: &IngestionProperties,
    authorization_context: &str,
    created: DateTime<Utc>,
) -> Result<String, IngestError> {
    let mut additional = BTreeMap::new();
    additional.insert("authorizationContext", authorization_context.to_string());
    additional.insert("format", props.format.as_str().to_string());
    if props.ignore_first_record {
        additional.insert("ignoreFirstRecord", "true".to_string());
    }
    let tags = props.tags();
    if !tags.is_empty() {
        let encoded = serde_json::to_string(&tags)?;
        additional.insert("tags", encoded);
    }

    let info = IngestionBlobInfo {
        id: source_id,
        blob_path,
        raw_data_size,
        database_name: &props.database,
        table_name: &props.table,
        retain_blob_on_success: true,
        flush_immediately: props.flush_immediately,
        report_level: props.report_level.code(),
        report_method: 0,
        source_message_creation_time: created,
        additional_properties: additional,
    };
    let json = serde_json::to_string(&info)?;
    Ok(STANDARD.encode(json))
}

/// Submits one table for ingestion, returning its source id.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest_table(
        &self,
        table: &StoreTable,
        props: &IngestionProperties,
    ) -> Result<Uuid, IngestError>;

    /// Create the destination table, or merge new columns into it.
    async fn ensure_table(
        &self,
        _table: &StoreTable,
        _props: &IngestionProperties,
    ) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Blob container addressed by a SAS URI.
struct SasContainer {
    store: Arc<dyn ObjectStore>,
    url: Url,
    container: String,
}

impl SasContainer {
    fn parse(uri: &str) -> Result<Self, IngestError> {
        let url = Url::parse(uri).map_err(|e| IngestError::InvalidUri(format!("{uri}: {e}")))?;
        let account = url
            .host_str()
            .and_then(|h| h.split('.').next())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| IngestError::InvalidUri(format!("{uri}: no storage account")))?
            .to_string();
        let container = url
            .path_segments()
            .and_then(|mut s| s.next())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IngestError::InvalidUri(format!("{uri}: no container")))?
            .to_string();

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(account)
            .with_container_name(&container);
        if let Some(sas) = url.query() {
            builder = builder.with_config(AzureConfigKey::SasKey, sas);
        }
        Ok(Self {
            store: Arc::new(builder.build()?),
            url,
            container,
        })
    }

    /// Public URL of a blob in this container, SAS included.
    fn blob_url(&self, blob_name: &str) -> String {
        let mut url = self.url.clone();
        url.set_path(&format!("{}/{}", self.container, blob_name));
        url.to_string()
    }
}

/// [`Ingestor`] backed by an ADX ingest endpoint.
pub struct QueuedIngestor {
    client: KustoClient,
    engine: Option<KustoClient>,
    resources: OnceCell<IngestionResources>,
    authorization_context: OnceCell<String>,
}

impl QueuedIngestor {
    /// `client` must point at the ingest endpoint (`https://ingest-...`).
    pub fn new(client: KustoClient) -> Self {
        Self {
            client,
            engine: None,
            resources: OnceCell::new(),
            authorization_context: OnceCell::new(),
        }
    }

    /// Engine endpoint used for `.create-merge table`. Without it
    /// [`Ingestor::ensure_table`] does nothing.
    pub fn with_engine(mut self, engine: KustoClient) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Ingestion resources, fetched once.
    pub async fn resources(&self) -> Result<&IngestionResources, IngestError> {
        self.resources
            .get_or_try_init(|| self.client.ingestion_resources())
            .await
    }

    async fn authorization_context(&self) -> Result<&str, IngestError> {
        self.authorization_context
            .get_or_try_init(|| self.client.identity_token())
            .await
            .map(String::as_str)
    }

    /// Consumers for every success and failure status queue.
    pub async fn status_queues(&self) -> Result<StatusQueues, IngestError> {
        let resources = self.resources().await?;
        let build = |uris: &[String]| -> Result<Vec<Arc<dyn QueueConsumer>>, IngestError> {
            uris.iter()
                .map(|uri| {
                    AzureQueueConsumer::from_sas_uri(self.client.http().clone(), uri)
                        .map(|q| Arc::new(q) as Arc<dyn QueueConsumer>)
                        .map_err(IngestError::from)
                })
                .collect()
        };
        Ok(StatusQueues::new(
            build(&resources.success_queues)?,
            build(&resources.failure_queues)?,
        ))
    }
}

/// Spread load over the available resources by source id.
fn pick<'a>(items: &'a [String], source_id: Uuid, what: &'static str) -> Result<&'a str, IngestError> {
    if items.is_empty() {
        return Err(IngestError::MissingResource(what));
    }
    let idx = (source_id.as_u128() % items.len() as u128) as usize;
    Ok(&items[idx])
}

#[async_trait]
impl Ingestor for QueuedIngestor {
    async fn ingest_table(
        &self,
        table: &StoreTable,
        props: &IngestionProperties,
    ) -> Result<Uuid, IngestError> {
        for tag in &props.drop_by_tags {
            validate_tag(tag)?;
        }
        let resources = self.resources().await?;
        let authorization_context = self.authorization_context().await?;
        let source_id = Uuid::new_v4();

        let container = SasContainer::parse(pick(&resources.temp_storage, source_id, "temp storage")?)?;
        let blob_name = format!(
            "{}__{}__{}__{}",
            props.database,
            props.table,
            source_id,
            table.file_name()
        );
        let data = tokio::fs::read(&table.path).await?;
        let size = data.len() as u64;
        let location = object_store::path::Path::from(blob_name.as_str());
        container
            .store
            .put(&location, bytes::Bytes::from(data).into())
            .await?;
        let blob_path = container.blob_url(&blob_name);

        let queue = AzureQueueConsumer::from_sas_uri(
            self.client.http().clone(),
            pick(&resources.ingestion_queues, source_id, "ingestion queue")?,
        )?;
        let message = ingestion_message(
            source_id,
            &blob_path,
            size,
            props,
            authorization_context,
            Utc::now(),
        )?;
        queue.send(&message).await?;

        info!(
            table = %props.table,
            database = %props.database,
            source_id = %source_id,
            bytes = size,
            "Queued ingestion"
        );
        Ok(source_id)
    }

    async fn ensure_table(
        &self,
        table: &StoreTable,
        props: &IngestionProperties,
    ) -> Result<(), IngestError> {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        let columns = table.kusto_columns()?;
        engine
            .create_merge_table(&props.database, &props.table, &columns)
            .await
    }
}
