//! Minimal Kusto (ADX) REST client for management commands.
//!
//! Only the v1 management endpoint is used: `POST {cluster}/v1/rest/mgmt`
//! with `{"db": ..., "csl": ...}`, answered by a list of tables.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::credentials::TokenProvider;
use crate::error::IngestError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KustoColumn {
    pub column_name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub column_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KustoTable {
    #[serde(default)]
    pub table_name: String,
    pub columns: Vec<KustoColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl KustoTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.column_name == name)
    }

    /// String values of one column; non-string cells are skipped.
    pub fn strings(&self, name: &str) -> Result<Vec<String>, IngestError> {
        let idx = self
            .column(name)
            .ok_or_else(|| IngestError::KustoResponse(format!("missing column {name}")))?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| row.get(idx).and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KustoResponse {
    pub tables: Vec<KustoTable>,
}

impl KustoResponse {
    pub fn primary(&self) -> Result<&KustoTable, IngestError> {
        self.tables
            .first()
            .ok_or_else(|| IngestError::KustoResponse("response has no tables".into()))
    }
}

#[derive(Serialize)]
struct MgmtRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<&'a str>,
    csl: &'a str,
}

/// SAS URIs of the queues and containers behind an ingest endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionResources {
    pub ingestion_queues: Vec<String>,
    pub success_queues: Vec<String>,
    pub failure_queues: Vec<String>,
    pub temp_storage: Vec<String>,
}

impl IngestionResources {
    /// Read the `ResourceTypeName`/`StorageRoot` rows of `.get ingestion resources`.
    pub fn from_response(response: &KustoResponse) -> Result<Self, IngestError> {
        let table = response.primary()?;
        let kind_idx = table
            .column("ResourceTypeName")
            .ok_or_else(|| IngestError::KustoResponse("missing column ResourceTypeName".into()))?;
        let root_idx = table
            .column("StorageRoot")
            .ok_or_else(|| IngestError::KustoResponse("missing column StorageRoot".into()))?;

        let mut resources = Self::default();
        for row in &table.rows {
            let (Some(kind), Some(root)) = (
                row.get(kind_idx).and_then(Value::as_str),
                row.get(root_idx).and_then(Value::as_str),
            ) else {
                continue;
            };
            let bucket = match kind {
                "SecuredReadyForAggregationQueue" => &mut resources.ingestion_queues,
                "SuccessfulIngestionsQueue" => &mut resources.success_queues,
                "FailedIngestionsQueue" => &mut resources.failure_queues,
                "TempStorage" => &mut resources.temp_storage,
                _ => continue,
            };
            bucket.push(root.to_string());
        }
        Ok(resources)
    }
}

/// Reject tags that cannot be embedded in a single-quoted Kusto literal.
pub fn validate_tag(tag: &str) -> Result<(), IngestError> {
    if tag.is_empty() || tag.contains(['\'', '"', '\\', '\n', '\r']) {
        return Err(IngestError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

/// Command dropping every extent of the database tagged `drop-by:{tag}`.
pub fn drop_by_tag_command(tag: &str) -> Result<String, IngestError> {
    validate_tag(tag)?;
    Ok(format!(
        ".drop extents <| .show database extents where tags has 'drop-by:{tag}'"
    ))
}

fn quote_name(name: &str) -> String {
    format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `.create-merge table` command for `(name, kusto type)` columns.
pub fn create_merge_table_command(table: &str, columns: &[(String, String)]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|(name, kind)| format!("{}:{}", quote_name(name), kind))
        .collect();
    format!(".create-merge table {} ({})", quote_name(table), cols.join(", "))
}

/// Client for one Kusto endpoint (engine or ingest).
#[derive(Clone)]
pub struct KustoClient {
    http: Client,
    endpoint: String,
    tokens: Arc<TokenProvider>,
}

impl KustoClient {
    pub fn new(http: Client, endpoint: &str, tokens: Arc<TokenProvider>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Run a management command and return the raw tables.
    pub async fn execute_mgmt(
        &self,
        database: Option<&str>,
        command: &str,
    ) -> Result<KustoResponse, IngestError> {
        let token = self.tokens.token(&self.endpoint).await?;
        debug!(endpoint = %self.endpoint, database, command, "Executing Kusto command");

        let resp = self
            .http
            .post(format!("{}/v1/rest/mgmt", self.endpoint))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("x-ms-app", "coal")
            .header("x-ms-client-request-id", format!("coal;{}", Uuid::new_v4()))
            .json(&MgmtRequest { db: database, csl: command })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::Kusto { status, body });
        }

        Ok(resp.json().await?)
    }

    /// `.get ingestion resources` (ingest endpoint only).
    pub async fn ingestion_resources(&self) -> Result<IngestionResources, IngestError> {
        let response = self.execute_mgmt(None, ".get ingestion resources").await?;
        let resources = IngestionResources::from_response(&response)?;
        info!(
            ingestion_queues = resources.ingestion_queues.len(),
            success_queues = resources.success_queues.len(),
            failure_queues = resources.failure_queues.len(),
            temp_storage = resources.temp_storage.len(),
            "Fetched ingestion resources"
        );
        Ok(resources)
    }

    /// `.get kusto identity token`: the authorization context every queued
    /// ingestion message must carry.
    pub async fn identity_token(&self) -> Result<String, IngestError> {
        let response = self.execute_mgmt(None, ".get kusto identity token").await?;
        response
            .primary()?
            .strings("AuthorizationContext")?
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::KustoResponse("empty identity token".into()))
    }

    pub async fn create_merge_table(
        &self,
        database: &str,
        table: &str,
        columns: &[(String, String)],
    ) -> Result<(), IngestError> {
        let command = create_merge_table_command(table, columns);
        self.execute_mgmt(Some(database), &command).await?;
        info!(database, table, columns = columns.len(), "Table created or merged");
        Ok(())
    }

    /// Drop all extents tagged `drop-by:{tag}`, returning how many went.
    pub async fn drop_by_tag(&self, database: &str, tag: &str) -> Result<usize, IngestError> {
        let command = drop_by_tag_command(tag)?;
        let response = self.execute_mgmt(Some(database), &command).await?;
        let dropped = response.tables.first().map_or(0, |t| t.rows.len());
        info!(database, tag, dropped, "Dropped extents by tag");
        Ok(dropped)
    }
}
