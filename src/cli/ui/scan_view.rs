use std::fmt::{self, Display, Formatter};

use crate::cli::check::BackendStatus;
use crate::hw::ScannedDevice;

use super::painter::{Painter, Tone};
use super::table::Table;

const UNNAMED: &str = "<unnamed>";

/// Renders scan results as an address/name table.
pub(crate) struct ScanView<'a> {
    devices: &'a [ScannedDevice],
    painter: &'a Painter,
}

impl<'a> ScanView<'a> {
    pub(crate) fn new(devices: &'a [ScannedDevice], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for ScanView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.paint("No devices found", Tone::Warning));
        }

        let rows = self
            .devices
            .iter()
            .map(|device| {
                vec![
                    self.painter.paint(device.address().to_string(), Tone::Value),
                    match device.name() {
                        Some(name) => name.to_string(),
                        None => self.painter.paint(UNNAMED, Tone::Muted),
                    },
                ]
            })
            .collect();
        write!(f, "{}", Table::grid(["address", "name"], rows))
    }
}

/// Renders backend availability.
pub(crate) struct BackendCheckView<'a> {
    statuses: &'a [BackendStatus],
    painter: &'a Painter,
}

impl<'a> BackendCheckView<'a> {
    pub(crate) fn new(statuses: &'a [BackendStatus], painter: &'a Painter) -> Self {
        Self { statuses, painter }
    }
}

impl Display for BackendCheckView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rows = self
            .statuses
            .iter()
            .map(|status| {
                vec![
                    self.painter.paint(status.backend.to_string(), Tone::Value),
                    self.painter.flag(status.available),
                ]
            })
            .collect();
        write!(f, "{}", Table::grid(["backend", "available"], rows))
    }
}
