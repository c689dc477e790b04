use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use coal_core::config::MonitorConfig;

/// Send local tables to Azure Data Explorer and track their ingestion.
///
/// Connection settings come from the environment (and `.env`); see
/// `coal config` for what was picked up.
#[derive(Parser, Debug)]
#[command(name = "coal", version, about = "Send local tables to Azure Data Explorer")]
pub struct CliArgs {
    /// Config profile, overrides COAL_PROFILE
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest every table of the store, tagged for rollback
    AdxSendData(SendArgs),
    /// Report the ingestion status of source ids
    AdxCheckStatus(CheckArgs),
    /// Drop every extent carrying a drop-by tag
    AdxDropByTag(DropArgs),
    /// List the tables of the store with their inferred columns
    StoreList(StoreArgs),
    /// Print the resolved configuration (secrets redacted)
    Config,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Store directory (default: COAL_STORE_DIR)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Target database (default: AZURE_DATA_EXPLORER_DATABASE_NAME)
    #[arg(long)]
    pub database: Option<String>,

    /// Drop-by tag; generated when omitted
    #[arg(long)]
    pub tag: Option<String>,

    /// Wait for acknowledgements and roll back on failure
    #[arg(long)]
    pub wait: bool,

    /// Create or merge destination tables before ingesting
    #[arg(long)]
    pub create_tables: bool,

    #[command(flatten)]
    pub monitor: MonitorArgs,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Source ids returned by a previous send
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Keep polling until every id is resolved or retries run out
    #[arg(long)]
    pub wait: bool,

    #[command(flatten)]
    pub monitor: MonitorArgs,
}

#[derive(Args, Debug)]
pub struct DropArgs {
    #[arg(long)]
    pub tag: String,

    /// Database (default: AZURE_DATA_EXPLORER_DATABASE_NAME)
    #[arg(long)]
    pub database: Option<String>,
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Store directory (default: COAL_STORE_DIR)
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Overrides for the ingestion monitor settings.
#[derive(Args, Debug, Clone, Default)]
pub struct MonitorArgs {
    /// Seconds before a queued ingestion counts as timed out
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra status checks after the first one
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds between status checks
    #[arg(long)]
    pub interval: Option<u64>,
}

impl MonitorArgs {
    pub fn apply(&self, base: &MonitorConfig) -> MonitorConfig {
        MonitorConfig {
            timeout_secs: self.timeout.unwrap_or(base.timeout_secs),
            max_retries: self.retries.unwrap_or(base.max_retries),
            poll_interval_secs: self.interval.unwrap_or(base.poll_interval_secs),
            ..base.clone()
        }
    }
}
