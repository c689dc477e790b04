use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use coal_core::Config;
use coal_ingest::{
    check_status, rollback_by_tag, send_store, wait_for_ingestion, AzureCredential,
    CheckOptions, IngestionStatus, KustoClient, QueuedIngestor, SendOptions, StatusStore, Store, TokenProvider,
    WaitSettings,
};

use crate::cli::{CheckArgs, DropArgs, SendArgs, StoreArgs};
use crate::terminal::Terminal;

/// Engine and ingest endpoints sharing one token provider.
struct Adx {
    engine: KustoClient,
    ingest: KustoClient,
}

impl Adx {
    fn connect(config: &Config) -> Result<Self> {
        let credential =
            AzureCredential::from_config(&config.azure).context("Azure credentials are incomplete")?;
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenProvider::new(http.clone(), credential));

        let engine_uri = config.adx.require_uri()?;
        let ingest_uri = config
            .adx
            .ingest_uri()
            .context("no ADX ingest endpoint configured")?;
        info!(engine = %engine_uri, ingest = %ingest_uri, "Connecting to ADX");

        Ok(Self {
            engine: KustoClient::new(http.clone(), engine_uri, tokens.clone()),
            ingest: KustoClient::new(http, &ingest_uri, tokens),
        })
    }
}

fn database(config: &Config, explicit: Option<&str>) -> Result<String> {
    match explicit {
        Some(db) => Ok(db.to_string()),
        None => Ok(config.adx.require_database()?.to_string()),
    }
}

// ── adx-send-data ─────────────────────────────────────────────

/// Returns whether the run was clean (no failure, no rollback).
pub async fn send_data(config: &Config, args: SendArgs, terminal: &Terminal) -> Result<bool> {
    let dir = args.store.unwrap_or_else(|| config.store.dir.clone());
    let store = Store::open(&dir)?;
    let database = database(config, args.database.as_deref())?;
    let adx = Adx::connect(config)?;

    let ingestor = QueuedIngestor::new(adx.ingest.clone()).with_engine(adx.engine.clone());
    let queues = if args.wait {
        ingestor
            .status_queues()
            .await
            .context("failed to resolve ingestion status queues")?
    } else {
        Default::default()
    };

    let monitor = args.monitor.apply(&config.monitor);
    let options = SendOptions {
        database,
        tag: args.tag,
        wait: args.wait,
        create_tables: args.create_tables,
        wait_settings: WaitSettings::from(&monitor),
    };

    let mut status = StatusStore::new();
    let report = send_store(&store, &ingestor, &queues, &mut status, &adx.engine, &options)
        .await
        .context("send failed")?;
    terminal.print_send_report(&report)?;

    Ok(!report.any_failure() && !report.rolled_back)
}

// ── adx-check-status ──────────────────────────────────────────

pub async fn check(config: &Config, args: CheckArgs, terminal: &Terminal) -> Result<bool> {
    let adx = Adx::connect(config)?;
    let queues = QueuedIngestor::new(adx.ingest)
        .status_queues()
        .await
        .context("failed to resolve ingestion status queues")?;

    // Ids on the command line come from an earlier send: track them as
    // submitted so the first check already matches their acknowledgements.
    let mut status = StatusStore::new();
    for id in &args.ids {
        status.register_queued(id);
    }

    let monitor = args.monitor.apply(&config.monitor);
    let statuses = if args.wait {
        let settings = WaitSettings::from(&monitor);
        let outcome = wait_for_ingestion(&mut status, &queues, &args.ids, &settings).await?;
        if outcome.inconclusive {
            terminal.warn("some ingestions were still unresolved when retries ran out")?;
        }
        outcome.statuses
    } else {
        let mut options = CheckOptions::from(&monitor);
        options.logs = true;
        check_status(&mut status, &queues, &args.ids, &options).await?
    };

    terminal.print_statuses(&statuses)?;
    Ok(!statuses
        .iter()
        .any(|(_, s)| *s == IngestionStatus::Failure))
}

// ── adx-drop-by-tag ───────────────────────────────────────────

pub async fn drop_by_tag(config: &Config, args: DropArgs, terminal: &Terminal) -> Result<bool> {
    let database = database(config, args.database.as_deref())?;
    let adx = Adx::connect(config)?;
    let dropped = rollback_by_tag(&adx.engine, &database, &args.tag).await;
    if dropped {
        terminal.info(&format!("dropped extents tagged drop-by:{}", args.tag))?;
    } else {
        terminal.error(&format!("failed to drop extents tagged drop-by:{}", args.tag))?;
    }
    Ok(dropped)
}

// ── store-list ────────────────────────────────────────────────

pub fn store_list(config: &Config, args: StoreArgs, terminal: &Terminal) -> Result<bool> {
    let dir = args.store.unwrap_or_else(|| config.store.dir.clone());
    let tables = Store::open(&dir)?.tables()?;
    if tables.is_empty() {
        terminal.warn(&format!("no tables in {}", dir.display()))?;
    }
    terminal.print_tables(&tables)?;
    Ok(true)
}
