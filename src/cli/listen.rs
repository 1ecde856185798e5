use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::{BackendSettings, parse_duration};
use crate::hw::{AttributeHandle, DeviceAddress};
use crate::terminal::TerminalClient;

use super::ui::{ListenSummaryView, NotificationView, Painter};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Peripheral address, e.g. `C4:7C:8D:6A:3E:01`.
    address: DeviceAddress,
    /// Handle whose notifications should be enabled.
    handle: AttributeHandle,
    /// How long to listen (e.g. `10s`).
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    duration: Duration,
}

impl ListenArgs {
    #[must_use]
    pub fn new(address: DeviceAddress, handle: AttributeHandle, duration: Duration) -> Self {
        Self {
            address,
            handle,
            duration,
        }
    }
}

/// One received notification.
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct ReceivedNotification {
    pub(crate) index: usize,
    pub(crate) handle: AttributeHandle,
    #[serde_as(as = "serde_with::hex::Hex<serde_with::formats::Uppercase>")]
    pub(crate) payload: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct ListenReport<'a> {
    address: DeviceAddress,
    handle: AttributeHandle,
    received: bool,
    notifications: &'a [ReceivedNotification],
}

/// Executes the `listen` command.
#[instrument(skip_all, level = "info", fields(backend = %settings.kind(), address = %args.address, handle = %args.handle))]
pub(crate) async fn run<W>(
    settings: &BackendSettings,
    args: &ListenArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut manager = settings.open_manager().await?;
    let mut notifications = Vec::new();
    let received = {
        let mut scope = manager.scope(args.address).await?;
        let mut sink = |handle: AttributeHandle, payload: &[u8]| {
            let index = notifications.len() + 1;
            notifications.push(ReceivedNotification {
                index,
                handle,
                payload: payload.to_vec(),
            });
        };
        scope
            .wait_for_notification(args.handle, &mut sink, args.duration)
            .await?
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            for notification in &notifications {
                writeln!(out, "{}", NotificationView::new(notification, &painter))?;
            }
            writeln!(
                out,
                "{}",
                ListenSummaryView::new(args.address, notifications.len(), &painter)
            )?;
        }
        OutputFormat::Json => {
            let report = ListenReport {
                address: args.address,
                handle: args.handle,
                received,
                notifications: &notifications,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
