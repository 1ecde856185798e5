use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::{BackendSettings, parse_duration};
use crate::terminal::TerminalClient;

use super::ui::{Painter, ScanView};

const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to listen for advertisements (e.g. `10s`).
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    duration: Duration,
}

impl ScanArgs {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_DURATION)
    }
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "info", fields(backend = %settings.kind(), duration = ?args.duration))]
pub(crate) async fn run<W>(
    settings: &BackendSettings,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let manager = settings.open_manager().await?;
    let devices = manager
        .scan_for_devices(args.duration, settings.config().adapter())
        .await?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ScanView::new(&devices, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &devices)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
