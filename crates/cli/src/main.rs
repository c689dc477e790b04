mod cli;
mod commands;
mod terminal;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use coal_core::config::{self, Config};

use crate::cli::{CliArgs, Command};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> ExitCode {
    // .env may carry RUST_LOG, so it is loaded before the subscriber.
    config::load_dotenv();

    // Logs go to stderr so reports on stdout stay pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let terminal = Terminal::new();

    match run(args, &terminal).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            // Nothing left to report to if stderr itself is gone.
            let _ = terminal.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

/// Filter from a `RUST_LOG` directive, `info` when unset or invalid.
fn log_filter(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

async fn run(args: CliArgs, terminal: &Terminal) -> Result<bool> {
    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();

    match args.command {
        Command::AdxSendData(send) => commands::send_data(&config, send, terminal).await,
        Command::AdxCheckStatus(check) => commands::check(&config, check, terminal).await,
        Command::AdxDropByTag(drop) => commands::drop_by_tag(&config, drop, terminal).await,
        Command::StoreList(store) => commands::store_list(&config, store, terminal),
        Command::Config => {
            terminal.print_json(&config.redacted_summary())?;
            Ok(true)
        }
    }
}
