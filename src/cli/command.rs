use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::gatt::{ReadArgs, WriteArgs};
use crate::cli::listen::ListenArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{BackendError, CliConfigError};
use crate::hw::{
    AddressType, BackendConfig, BackendKind, ConnectionManager, FakeBackendConfig,
    NotificationPayloads, ScanFixture, open_backend,
};

/// Command-line options for the BLE GATT access tool.
#[derive(Debug, Parser)]
#[command(name = "gattwrap", about = "Read, write and scan BLE GATT peripherals.")]
pub struct Args {
    /// Transport used to reach the peripheral.
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Gatttool)]
    backend: BackendKind,
    /// Local adapter, e.g. `hci0`.
    #[arg(long, global = true, default_value = "hci0")]
    adapter: String,
    /// Address type of the peripheral.
    #[arg(long, global = true, value_enum, default_value_t = AddressType::Public)]
    address_type: AddressType,
    /// Per-attempt time limit for tool invocations and socket exchanges (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Extra attempts after a stalled tool invocation.
    #[arg(long, global = true)]
    retries: Option<u32>,
    /// Delay before the first retry; doubles on each further retry.
    #[arg(long, global = true, value_parser = parse_duration)]
    retry_delay: Option<Duration>,
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to pretty on a terminal and JSON otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Fake scan results in the form `address|name;...`, `-` for no name.
    #[arg(long, global = true)]
    fake_scan: Option<ScanFixture>,
    /// Fake notification payloads as comma-separated hexadecimal values.
    #[arg(long, global = true)]
    fake_notifications: Option<NotificationPayloads>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing, using the fake backend.
    ///
    /// ```
    /// use gattwrap::{Args, Command};
    ///
    /// let args = Args::fake(Command::Check);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn fake(command: Command) -> Self {
        Self {
            backend: BackendKind::Fake,
            adapter: "hci0".to_string(),
            address_type: AddressType::Public,
            timeout: None,
            retries: None,
            retry_delay: None,
            log_level: None,
            output: None,
            fake_scan: None,
            fake_notifications: None,
            command,
        }
    }

    /// Sets the fake scan fixture.
    #[must_use]
    pub fn with_fake_scan(mut self, fixture: ScanFixture) -> Self {
        self.fake_scan = Some(fixture);
        self
    }

    /// Sets the fake notification payloads.
    #[must_use]
    pub fn with_fake_notifications(mut self, notifications: NotificationPayloads) -> Self {
        self.fake_notifications = Some(notifications);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed arguments into the command and the backend it should run against.
    ///
    /// # Errors
    ///
    /// Returns an error if fake fixtures are given for a real backend.
    pub fn into_command_and_backend(self) -> Result<(Command, BackendSettings), CliConfigError> {
        let Args {
            backend,
            adapter,
            address_type,
            timeout,
            retries,
            retry_delay,
            fake_scan,
            fake_notifications,
            command,
            ..
        } = self;

        let fake = match backend {
            BackendKind::Fake => Some(
                FakeBackendConfig::builder()
                    .maybe_scan_fixture(fake_scan)
                    .maybe_notifications(fake_notifications)
                    .build(),
            ),
            _ if fake_scan.is_some() || fake_notifications.is_some() => {
                return Err(CliConfigError::FakeFixturesRequireFakeBackend);
            }
            _ => None,
        };

        let config = BackendConfig::builder()
            .adapter(adapter)
            .maybe_timeout(timeout)
            .maybe_retries(retries)
            .maybe_retry_delay(retry_delay)
            .maybe_fake(fake)
            .build();

        let settings = BackendSettings::builder()
            .kind(backend)
            .config(config)
            .address_type(address_type)
            .build();
        Ok((command, settings))
    }
}

/// Which backend a command runs against, and how it is configured.
#[derive(Debug, Clone, Builder)]
pub struct BackendSettings {
    kind: BackendKind,
    #[builder(default)]
    config: BackendConfig,
    #[builder(default)]
    address_type: AddressType,
}

impl BackendSettings {
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Opens the backend and wraps it in a connection manager.
    pub(crate) async fn open_manager(&self) -> Result<ConnectionManager, BackendError> {
        let backend = open_backend(self.kind, self.config.clone()).await?;
        Ok(ConnectionManager::new(backend).with_address_type(self.address_type))
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Report which backends can run on this host.
    Check,
    /// Scan for advertising peripherals.
    Scan(ScanArgs),
    /// Connect and read one attribute.
    Read(ReadArgs),
    /// Connect and write one attribute.
    Write(WriteArgs),
    /// Connect, enable notifications on one attribute and print what arrives.
    Listen(ListenArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn global_flags_build_backend_config() {
        let args = Args::try_parse_from([
            "gattwrap",
            "--backend",
            "socket",
            "--adapter",
            "hci1",
            "--address-type",
            "random",
            "--timeout",
            "5s",
            "--retries",
            "1",
            "check",
        ])
        .expect("valid arguments should parse");

        let (command, settings) = args
            .into_command_and_backend()
            .expect("real backend without fixtures is valid");

        assert_matches!(command, Command::Check);
        assert_eq!(BackendKind::Socket, settings.kind());
        assert_eq!("hci1", settings.config().adapter().as_str());
        assert_eq!(Duration::from_secs(5), settings.config().timeout());
        assert_eq!(1, settings.config().retries());
        assert_eq!(AddressType::Random, settings.address_type);
    }

    #[test]
    fn fake_fixtures_require_fake_backend() {
        let args = Args::try_parse_from([
            "gattwrap",
            "--fake-scan",
            "C4:7C:8D:6A:3E:01|Flower care",
            "scan",
        ])
        .expect("arguments should parse");

        assert_eq!(
            Err(CliConfigError::FakeFixturesRequireFakeBackend),
            args.into_command_and_backend().map(|_| ())
        );
    }

    #[test]
    fn malformed_fake_scan_is_a_parse_error() {
        let result = Args::try_parse_from([
            "gattwrap",
            "--backend",
            "fake",
            "--fake-scan",
            "not-an-address|name",
            "scan",
        ]);

        let error = result.expect_err("bad fixture should fail argument parsing");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn read_requires_address_and_handle() {
        let result = Args::try_parse_from(["gattwrap", "read", "C4:7C:8D:6A:3E:01"]);

        let error = result.expect_err("missing handle should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }
}
