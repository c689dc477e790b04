//! Roll back a send by dropping every extent it tagged.

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::IngestError;
use crate::kusto::KustoClient;

/// Anything that can drop extents by their `drop-by` tag.
#[async_trait]
pub trait TagDropper: Send + Sync {
    async fn drop_by_tag(&self, database: &str, tag: &str) -> Result<usize, IngestError>;
}

#[async_trait]
impl TagDropper for KustoClient {
    async fn drop_by_tag(&self, database: &str, tag: &str) -> Result<usize, IngestError> {
        KustoClient::drop_by_tag(self, database, tag).await
    }
}

/// Drop the extents tagged `drop-by:{tag}`. Returns whether the drop
/// succeeded; errors are logged, never raised, so a failed rollback cannot
/// mask the failure that triggered it.
pub async fn rollback_by_tag(dropper: &dyn TagDropper, database: &str, tag: &str) -> bool {
    info!(database, tag, "Rolling back ingestion by tag");
    match dropper.drop_by_tag(database, tag).await {
        Ok(dropped) => {
            info!(database, tag, dropped, "Rollback complete");
            true
        }
        Err(e) => {
            error!(database, tag, error = %e, "Rollback failed");
            false
        }
    }
}
