use std::io;

use anyhow::Result;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::BackendSettings;
use crate::hw::{BackendKind, available_backends};
use crate::terminal::TerminalClient;

use super::ui::{BackendCheckView, Painter};

/// Availability of one backend kind on this host.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub(crate) struct BackendStatus {
    pub(crate) backend: BackendKind,
    pub(crate) available: bool,
}

/// Executes the `check` command.
#[instrument(skip_all, level = "info")]
pub(crate) async fn run<W>(
    settings: &BackendSettings,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let available = available_backends(settings.config()).await;
    let statuses: Vec<BackendStatus> = BackendKind::iter()
        .map(|backend| BackendStatus {
            backend,
            available: available.contains(&backend),
        })
        .collect();

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", BackendCheckView::new(&statuses, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &statuses)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
