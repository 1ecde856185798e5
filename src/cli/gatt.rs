use std::io;
use std::str::FromStr;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_with::serde_as;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::BackendSettings;
use crate::error::AddressParseError;
use crate::hw::{AttributeHandle, DeviceAddress};
use crate::terminal::TerminalClient;
use crate::utils::parse_hex;

use super::ui::{AttributeView, Painter};

/// An attribute value given on the command line as hexadecimal digits.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Into)]
pub struct HexValue(Vec<u8>);

impl FromStr for HexValue {
    type Err = AddressParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_hex(value).map(Self)
    }
}

/// Arguments for the `read` command.
#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Peripheral address, e.g. `C4:7C:8D:6A:3E:01`.
    address: DeviceAddress,
    /// Attribute handle, decimal or `0x`-prefixed hexadecimal.
    handle: AttributeHandle,
}

impl ReadArgs {
    #[must_use]
    pub fn new(address: DeviceAddress, handle: AttributeHandle) -> Self {
        Self { address, handle }
    }
}

/// Arguments for the `write` command.
#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Peripheral address, e.g. `C4:7C:8D:6A:3E:01`.
    address: DeviceAddress,
    /// Attribute handle, decimal or `0x`-prefixed hexadecimal.
    handle: AttributeHandle,
    /// Value to write as hexadecimal digits, e.g. `A01F`.
    value: HexValue,
}

impl WriteArgs {
    #[must_use]
    pub fn new(address: DeviceAddress, handle: AttributeHandle, value: HexValue) -> Self {
        Self {
            address,
            handle,
            value,
        }
    }
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct AttributeReport<'a> {
    pub(crate) address: DeviceAddress,
    pub(crate) handle: AttributeHandle,
    #[serde_as(as = "serde_with::hex::Hex<serde_with::formats::Uppercase>")]
    pub(crate) value: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) confirmed: Option<bool>,
}

/// Executes the `read` command.
#[instrument(skip_all, level = "info", fields(backend = %settings.kind(), address = %args.address, handle = %args.handle))]
pub(crate) async fn run_read<W>(
    settings: &BackendSettings,
    args: &ReadArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut manager = settings.open_manager().await?;
    let value = {
        let mut scope = manager.scope(args.address).await?;
        scope.read_handle(args.handle).await?
    };

    let report = AttributeReport {
        address: args.address,
        handle: args.handle,
        value: &value,
        confirmed: None,
    };
    write_report(out, &report, terminal_client, output_format)
}

/// Executes the `write` command.
#[instrument(skip_all, level = "info", fields(backend = %settings.kind(), address = %args.address, handle = %args.handle))]
pub(crate) async fn run_write<W>(
    settings: &BackendSettings,
    args: &WriteArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut manager = settings.open_manager().await?;
    let confirmed = {
        let mut scope = manager.scope(args.address).await?;
        scope.write_handle(args.handle, &args.value.0).await?
    };

    let report = AttributeReport {
        address: args.address,
        handle: args.handle,
        value: &args.value.0,
        confirmed: Some(confirmed),
    };
    write_report(out, &report, terminal_client, output_format)
}

fn write_report<W>(
    out: &mut W,
    report: &AttributeReport<'_>,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", AttributeView::new(report, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hex_value_accepts_spaced_digits() {
        let value: HexValue = "a0 1f".parse().expect("hex should parse");
        assert_eq!(HexValue(vec![0xA0, 0x1F]), value);
    }

    #[test]
    fn hex_value_rejects_odd_length() {
        assert_matches!(
            "A01".parse::<HexValue>(),
            Err(AddressParseError::InvalidHexValue { .. })
        );
    }
}
