use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

use coal_ingest::{IngestionStatus, SendReport, StoreTable};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const SUCCESS: Color = Color::Green;
    const FAILURE: Color = Color::Red;
    const OTHER: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
    const WARNING: Color = Color::Yellow;
}

fn status_color(status: IngestionStatus) -> Color {
    match status {
        IngestionStatus::Success => Colors::SUCCESS,
        IngestionStatus::Failure => Colors::FAILURE,
        _ => Colors::OTHER,
    }
}

/// Colored report output on stdout. Logs go to stderr via tracing.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    pub fn print_statuses(&self, statuses: &[(String, IngestionStatus)]) -> Result<()> {
        let mut stdout = io::stdout();
        for (id, status) in statuses {
            execute!(
                stdout,
                Print(format!("{id}  ")),
                SetForegroundColor(status_color(*status)),
                Print(status.as_str()),
                ResetColor,
                Print("\n"),
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_send_report(&self, report: &SendReport) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print(format!("tag: {}\n", report.tag)),
            ResetColor,
        )?;
        for (table, source_id) in &report.submitted {
            let status = report
                .statuses
                .iter()
                .find(|(id, _)| *id == source_id.to_string())
                .map(|(_, s)| *s)
                .unwrap_or(IngestionStatus::Queued);
            execute!(
                stdout,
                Print(format!("{table:<24} {source_id}  ")),
                SetForegroundColor(status_color(status)),
                Print(status.as_str()),
                ResetColor,
                Print("\n"),
            )?;
        }
        if report.rolled_back {
            self.warn(&format!("rolled back: extents tagged drop-by:{} dropped", report.tag))?;
        }
        if report.inconclusive {
            self.warn("some ingestions were still unresolved when retries ran out")?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_tables(&self, tables: &[StoreTable]) -> Result<()> {
        let mut stdout = io::stdout();
        for table in tables {
            execute!(
                stdout,
                SetForegroundColor(Colors::HEADER),
                Print(&table.name),
                ResetColor,
                SetForegroundColor(Colors::OTHER),
                Print(format!(
                    "  {} {} bytes\n",
                    table.format.as_str(),
                    table.size_bytes
                )),
                ResetColor,
            )?;
            match table.kusto_columns() {
                Ok(columns) => {
                    for (name, kind) in columns {
                        execute!(stdout, Print(format!("    {name}: {kind}\n")))?;
                    }
                }
                Err(e) => self.error(&format!("    schema unavailable: {e}"))?,
            }
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_json(&self, value: &serde_json::Value) -> Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    pub fn info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Print(format!("{msg}\n")))?;
        Ok(())
    }

    pub fn warn(&self, msg: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::WARNING),
            Print(format!("{msg}\n")),
            ResetColor,
        )?;
        Ok(())
    }

    pub fn error(&self, msg: &str) -> Result<()> {
        let mut stderr = io::stderr();
        execute!(
            stderr,
            SetForegroundColor(Colors::FAILURE),
            Print(format!("Error: {msg}\n")),
            ResetColor,
        )?;
        Ok(())
    }
}
