//! Parsers for the line-oriented output of `gatttool` and `hcitool`.
//!
//! Every parser tolerates truncated input: output captured from a killed process may end in
//! the middle of a line, and such fragments are ignored.

use crate::error::ProtocolError;
use crate::hw::model::{AttributeHandle, DeviceAddress, ScannedDevice};

const READ_VALUE_PREFIX: &str = "Characteristic value/descriptor:";
const READ_FAILED_MARKER: &str = "read failed";
const WRITE_SUCCESS_MARKER: &str = "successfully";
const WRITE_FAILED_MARKER: &str = "Write Request failed";
const NOT_WRITABLE_MARKER: &str = "can't be written";
const INVALID_HANDLE_MARKER: &str = "Invalid handle";
const NOTIFICATION_PREFIX: &str = "Notification handle = ";
const NOTIFICATION_VALUE_SEPARATOR: &str = " value:";
const UNKNOWN_NAME: &str = "unknown";

/// One notification frame printed by `gatttool --listen`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct NotificationFrame {
    pub(crate) handle: Option<AttributeHandle>,
    pub(crate) payload: Vec<u8>,
}

/// Extracts the value of a `--char-read`.
///
/// Returns `Ok(None)` when the output carries no value yet, so the caller may retry.
pub(crate) fn read_value(output: &str) -> Result<Option<Vec<u8>>, ProtocolError> {
    if let Some(line) = find_line(output, &[READ_FAILED_MARKER, INVALID_HANDLE_MARKER]) {
        return Err(ProtocolError::Rejected {
            message: line.to_string(),
        });
    }

    Ok(output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(READ_VALUE_PREFIX))
        .find_map(hex_bytes))
}

/// Interprets the output of a `--char-write-req`.
///
/// Returns `Ok(Some(true))` on the success phrase and `Ok(None)` when the output is empty or
/// inconclusive.
pub(crate) fn write_result(output: &str) -> Result<Option<bool>, ProtocolError> {
    if let Some(message) = write_rejection(output) {
        return Err(ProtocolError::Rejected { message });
    }
    if output.contains(WRITE_SUCCESS_MARKER) {
        return Ok(Some(true));
    }
    Ok(None)
}

/// Returns the rejection line when the tool reported a failed or refused write.
pub(crate) fn write_rejection(output: &str) -> Option<String> {
    find_line(
        output,
        &[
            WRITE_FAILED_MARKER,
            NOT_WRITABLE_MARKER,
            INVALID_HANDLE_MARKER,
        ],
    )
    .map(ToString::to_string)
}

/// Collects every complete notification frame, in output order.
pub(crate) fn notification_frames(output: &str) -> Vec<NotificationFrame> {
    output.lines().filter_map(notification_frame).collect()
}

/// Parses `lescan` output into unique devices in first-seen order.
///
/// A device first seen without a name adopts the first name seen later; a known name is
/// never replaced.
pub(crate) fn scan_output(output: &str) -> Vec<ScannedDevice> {
    let mut devices: Vec<ScannedDevice> = Vec::new();
    for (address, name) in output.lines().filter_map(scan_line) {
        match devices
            .iter_mut()
            .find(|device| device.address() == address)
        {
            Some(existing) => {
                if existing.name().is_none() && name.is_some() {
                    existing.set_name(name);
                }
            }
            None => devices.push(ScannedDevice::new(address, name)),
        }
    }
    devices
}

fn find_line<'a>(output: &'a str, markers: &[&str]) -> Option<&'a str> {
    output
        .lines()
        .map(str::trim)
        .find(|line| markers.iter().any(|marker| line.contains(marker)))
}

fn notification_frame(line: &str) -> Option<NotificationFrame> {
    let rest = line.trim().strip_prefix(NOTIFICATION_PREFIX)?;
    let (raw_handle, raw_value) = rest.split_once(NOTIFICATION_VALUE_SEPARATOR)?;
    let payload = hex_bytes(raw_value)?;
    if payload.is_empty() {
        return None;
    }

    Some(NotificationFrame {
        handle: raw_handle.parse().ok(),
        payload,
    })
}

fn scan_line(line: &str) -> Option<(DeviceAddress, Option<String>)> {
    let (raw_address, rest) = line.trim().split_once(' ')?;
    let address = raw_address.parse().ok()?;
    let name = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
    let name = (!name.is_empty() && name != UNKNOWN_NAME).then(|| name.to_string());
    Some((address, name))
}

/// Decodes space-separated two-digit hex bytes; `None` if any token is malformed.
fn hex_bytes(raw: &str) -> Option<Vec<u8>> {
    raw.split_whitespace()
        .map(|token| {
            if token.len() != 2 {
                return None;
            }
            u8::from_str_radix(token, 16).ok()
        })
        .collect()
}
