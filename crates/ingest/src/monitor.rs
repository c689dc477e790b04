//! Blocking wait loop on top of [`check_status`].

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use coal_core::config::MonitorConfig;

use crate::error::IngestError;
use crate::reconciler::{check_status, CheckOptions, StatusQueues};
use crate::status::{IngestionStatus, StatusStore};

#[derive(Debug, Clone)]
pub struct WaitSettings {
    pub check: CheckOptions,
    /// Extra `check_status` calls after the first one.
    pub max_retries: u32,
    /// Sleep between calls while anything is unresolved.
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for WaitSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            check: CheckOptions::from(config),
            max_retries: config.max_retries,
            poll_interval: config.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitOutcome {
    /// Last known status of every requested id.
    pub statuses: Vec<(String, IngestionStatus)>,
    /// Number of `check_status` calls made.
    pub attempts: u32,
    /// Retries ran out with some ids still unresolved.
    pub inconclusive: bool,
}

impl WaitOutcome {
    pub fn any_failure(&self) -> bool {
        self.statuses
            .iter()
            .any(|(_, status)| *status == IngestionStatus::Failure)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(id, _)| id.as_str())
    }
}

/// Poll until every id is terminal or retries are exhausted.
///
/// Exhaustion is not an error: the outcome is flagged inconclusive and the
/// ids keep whatever status they last had.
pub async fn wait_for_ingestion(
    store: &mut StatusStore,
    queues: &StatusQueues,
    ids: &[String],
    settings: &WaitSettings,
) -> Result<WaitOutcome, IngestError> {
    let mut attempts = 0;
    loop {
        let statuses = check_status(store, queues, ids, &settings.check).await?;
        attempts += 1;

        let remaining = statuses.iter().filter(|(_, s)| !s.is_terminal()).count();
        if remaining == 0 {
            info!(ids = statuses.len(), attempts, "All ingestions resolved");
            return Ok(WaitOutcome {
                statuses,
                attempts,
                inconclusive: false,
            });
        }

        if attempts > settings.max_retries {
            warn!(
                remaining,
                attempts,
                "Ingestion status still unresolved after all retries"
            );
            return Ok(WaitOutcome {
                statuses,
                attempts,
                inconclusive: true,
            });
        }

        info!(
            remaining,
            attempt = attempts,
            max_retries = settings.max_retries,
            wait_secs = settings.poll_interval.as_secs_f64(),
            "Waiting for ingestion acknowledgements"
        );
        tokio::time::sleep(settings.poll_interval).await;
    }
}
