//! HCI command encoding and LE advertising report decoding.

use crate::error::ProtocolError;
use crate::hw::model::{DeviceAddress, ScannedDevice};

/// Largest HCI frame read from the control socket.
pub(crate) const HCI_MAX_FRAME: usize = 255;
pub(crate) const HCI_EVENT_PKT: u8 = 0x04;
pub(crate) const LE_META_EVENT: u8 = 0x3E;

const HCI_COMMAND_PKT: u8 = 0x01;
const LE_ADVERTISING_REPORT: u8 = 0x02;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;

const OGF_HOST_CTL: u16 = 0x03;
const OGF_LE_CTL: u16 = 0x08;
const OCF_SET_EVENT_MASK: u16 = 0x0001;
const OCF_LE_SET_EVENT_MASK: u16 = 0x0001;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

/// Controller default event mask.
const DEFAULT_EVENT_MASK: u64 = 0x0000_1FFF_FFFF_FFFF;
const LE_META_EVENT_MASK: u64 = 0x2000_0000_0000_0000;
/// Connection complete through long term key request.
const LE_EVENT_MASK: u64 = 0x1F;

// Report layout: packet type, event code, length, subevent, report count, event type,
// address type, address (6), data length, data.
const REPORT_ADDRESS: std::ops::Range<usize> = 7..13;
const REPORT_DATA_LENGTH: usize = 13;
const REPORT_DATA: usize = 14;

/// Scan parameters sent before enabling scanning.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct ScanParameters {
    active: bool,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            active: true,
            interval: 0x0010,
            window: 0x0010,
            own_address_type: 0,
            filter_policy: 0,
        }
    }
}

/// The HCI commands this driver issues.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum HciCommand {
    SetEventMask(u64),
    LeSetEventMask(u64),
    LeSetScanParameters(ScanParameters),
    LeSetScanEnable { enable: bool, filter_duplicates: bool },
}

impl HciCommand {
    /// Commands that unmask LE meta events on the controller.
    pub(crate) fn le_event_bring_up() -> [Self; 2] {
        [
            Self::SetEventMask(DEFAULT_EVENT_MASK | LE_META_EVENT_MASK),
            Self::LeSetEventMask(LE_EVENT_MASK),
        ]
    }

    pub(crate) fn scan_enable(enable: bool) -> Self {
        Self::LeSetScanEnable {
            enable,
            filter_duplicates: false,
        }
    }

    fn opcode(self) -> u16 {
        let (group, command) = match self {
            Self::SetEventMask(_) => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::LeSetEventMask(_) => (OGF_LE_CTL, OCF_LE_SET_EVENT_MASK),
            Self::LeSetScanParameters(_) => (OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS),
            Self::LeSetScanEnable { .. } => (OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE),
        };
        ((group & 0x3F) << 10) | (command & 0x03FF)
    }

    fn payload(self) -> Vec<u8> {
        match self {
            Self::SetEventMask(mask) | Self::LeSetEventMask(mask) => mask.to_le_bytes().to_vec(),
            Self::LeSetScanParameters(parameters) => {
                let mut payload = Vec::with_capacity(7);
                payload.push(u8::from(parameters.active));
                payload.extend_from_slice(&parameters.interval.to_le_bytes());
                payload.extend_from_slice(&parameters.window.to_le_bytes());
                payload.push(parameters.own_address_type);
                payload.push(parameters.filter_policy);
                payload
            }
            Self::LeSetScanEnable {
                enable,
                filter_duplicates,
            } => vec![u8::from(enable), u8::from(filter_duplicates)],
        }
    }

    /// Encodes `packet type || opcode (LE) || length || payload`.
    pub(crate) fn encode(self) -> Result<Vec<u8>, ProtocolError> {
        command_frame(self.opcode(), &self.payload())
    }
}

fn command_frame(opcode: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = u8::try_from(payload.len()).map_err(|_| ProtocolError::ValueTooLong {
        length: payload.len(),
        limit: usize::from(u8::MAX),
    })?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(HCI_COMMAND_PKT);
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.push(length);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decodes an LE advertising report event; any other frame yields `None`.
pub(crate) fn advertising_report(frame: &[u8]) -> Option<ScannedDevice> {
    if frame.get(1) != Some(&LE_META_EVENT) || frame.get(3) != Some(&LE_ADVERTISING_REPORT) {
        return None;
    }

    let mut octets = [0u8; 6];
    octets.copy_from_slice(frame.get(REPORT_ADDRESS)?);
    let address = DeviceAddress::from_wire(octets);

    let length = usize::from(*frame.get(REPORT_DATA_LENGTH)?);
    let end = frame.len().min(REPORT_DATA + length);
    let data = frame.get(REPORT_DATA..end).unwrap_or_default();
    Some(ScannedDevice::new(address, complete_local_name(data)))
}

/// Records a report, replacing the name of an already seen address with the latest one.
pub(crate) fn record_report(devices: &mut Vec<ScannedDevice>, report: ScannedDevice) {
    match devices
        .iter_mut()
        .find(|device| device.address() == report.address())
    {
        Some(existing) => existing.set_name(report.name().map(ToString::to_string)),
        None => devices.push(report),
    }
}

/// Walks advertising data records looking for the complete local name.
fn complete_local_name(mut data: &[u8]) -> Option<String> {
    let mut name = None;
    while let Some((&length, rest)) = data.split_first() {
        let length = usize::from(length);
        if length == 0 {
            break;
        }
        let Some(record) = rest.get(..length) else {
            break;
        };
        if let Some((&AD_COMPLETE_LOCAL_NAME, value)) = record.split_first() {
            name = Some(String::from_utf8_lossy(value).into_owned());
        }
        data = &rest[length..];
    }
    name
}
