use std::fmt::{self, Display, Formatter};

use crate::cli::listen::ReceivedNotification;
use crate::hw::DeviceAddress;
use crate::utils::format_hex;

use super::painter::{Painter, Tone};

/// One notification line: index, handle and payload bytes.
pub(crate) struct NotificationView<'a> {
    notification: &'a ReceivedNotification,
    painter: &'a Painter,
}

impl<'a> NotificationView<'a> {
    pub(crate) fn new(notification: &'a ReceivedNotification, painter: &'a Painter) -> Self {
        Self {
            notification,
            painter,
        }
    }
}

impl Display for NotificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter
                .paint(format!("#{}", self.notification.index), Tone::Muted),
            self.painter
                .paint(self.notification.handle.to_string(), Tone::Value),
            format_hex(&self.notification.payload)
        )
    }
}

/// Closing line of a listen run.
pub(crate) struct ListenSummaryView<'a> {
    address: DeviceAddress,
    count: usize,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(address: DeviceAddress, count: usize, painter: &'a Painter) -> Self {
        Self {
            address,
            count,
            painter,
        }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tone = if self.count == 0 {
            Tone::Warning
        } else {
            Tone::Heading
        };
        let noun = if self.count == 1 {
            "notification"
        } else {
            "notifications"
        };
        write!(
            f,
            "{}",
            self.painter.paint(
                format!("Received {} {noun} from {}", self.count, self.address),
                tone
            )
        )
    }
}
