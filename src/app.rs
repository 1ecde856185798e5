use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{BackendSettings, Command, LogLevel, OutputFormat};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Runs one CLI command against the process's real terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = gattwrap::Args::try_parse_from([
///     "gattwrap",
///     "--backend",
///     "fake",
///     "--fake-scan",
///     "C4:7C:8D:6A:3E:01|Flower care",
///     "scan",
///     "--duration",
///     "1s",
/// ])?;
/// let log_level = args.log_level();
/// let (command, settings) = args.into_command_and_backend()?;
/// let mut out = Vec::new();
/// gattwrap::run(command, &mut out, &settings, log_level, gattwrap::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the backend is unavailable, a GATT
/// operation fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    settings: &BackendSettings,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        settings,
        log_level,
        output_format,
    )
    .await
}

/// Runs one CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the backend is unavailable, a GATT
/// operation fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, settings),
    level = "info",
    fields(command = %command_name(&command), backend = %settings.kind())
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    settings: &BackendSettings,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Check => {
            crate::cli::check::run(settings, out, terminal_client, output_format).await
        }
        Command::Scan(args) => {
            crate::cli::scan::run(settings, &args, out, terminal_client, output_format).await
        }
        Command::Read(args) => {
            crate::cli::gatt::run_read(settings, &args, out, terminal_client, output_format).await
        }
        Command::Write(args) => {
            crate::cli::gatt::run_write(settings, &args, out, terminal_client, output_format)
                .await
        }
        Command::Listen(args) => {
            crate::cli::listen::run(settings, &args, out, terminal_client, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Check => "check",
        Command::Scan(_args) => "scan",
        Command::Read(_args) => "read",
        Command::Write(_args) => "write",
        Command::Listen(_args) => "listen",
    }
}
