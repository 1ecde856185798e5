use std::fmt::{self, Display, Formatter};

use crate::cli::gatt::AttributeReport;
use crate::utils::format_hex;

use super::painter::{Painter, Tone};
use super::table::Table;

/// Renders the outcome of a read or write as a key-value table.
pub(crate) struct AttributeView<'a> {
    report: &'a AttributeReport<'a>,
    painter: &'a Painter,
}

impl<'a> AttributeView<'a> {
    pub(crate) fn new(report: &'a AttributeReport<'a>, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for AttributeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut rows = vec![
            (
                "address",
                self.painter.paint(self.report.address.to_string(), Tone::Value),
            ),
            (
                "handle",
                self.painter.paint(self.report.handle.to_string(), Tone::Value),
            ),
            ("value", format_hex(self.report.value)),
        ];
        if let Some(confirmed) = self.report.confirmed {
            rows.push(("confirmed", self.painter.flag(confirmed)));
        }
        write!(f, "{}", Table::key_value(self.painter, rows))
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::hw::{AttributeHandle, DeviceAddress};

    #[test]
    fn write_outcome_includes_confirmation() {
        let value = [0xA0, 0x1F];
        let report = AttributeReport {
            address: DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]),
            handle: AttributeHandle::new(0x33),
            value: &value,
            confirmed: Some(true),
        };
        let painter = Painter::new(false);

        assert_snapshot!(AttributeView::new(&report, &painter).to_string(), @r"
        ╭───────────┬───────────────────╮
        │ field     │ value             │
        ├───────────┼───────────────────┤
        │ address   │ C4:7C:8D:6A:3E:01 │
        │ handle    │ 0x0033            │
        │ value     │ A0 1F             │
        │ confirmed │ yes               │
        ╰───────────┴───────────────────╯
        ");
    }
}
