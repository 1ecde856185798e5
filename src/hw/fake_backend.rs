use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tracing::{debug, instrument};

use super::backend::{Backend, BackendKind, NotificationSink};
use super::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
use crate::error::{BackendError, FixtureError, ProtocolError};
use crate::utils::parse_hex;

/// Parsed fake scan fixture records in the form `address|name;...`, `-` meaning no name.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct ScanFixture {
    devices: Vec<ScannedDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let devices = value
            .split(';')
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

/// Parsed fake notification payloads as comma-separated hexadecimal values.
#[derive(Debug, Clone, Default, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = value
            .split(',')
            .map(str::trim)
            .filter(|payload| !payload.is_empty())
            .map(parse_hex)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { payloads })
    }
}

/// Settings for the in-memory peripheral.
#[derive(Debug, Clone, Default, Builder)]
pub struct FakeBackendConfig {
    #[builder(default)]
    scan_fixture: ScanFixture,
    #[builder(default)]
    notifications: NotificationPayloads,
    #[builder(default)]
    values: HashMap<AttributeHandle, Vec<u8>>,
}

/// In-memory peripheral that echoes written values back on read.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    peer: Option<DeviceAddress>,
    devices: Vec<ScannedDevice>,
    notifications: Vec<Vec<u8>>,
    values: HashMap<AttributeHandle, Vec<u8>>,
}

impl FakeBackend {
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        Self {
            peer: None,
            devices: config.scan_fixture.into(),
            notifications: config.notifications.into(),
            values: config.values,
        }
    }

    fn require_connected(&self) -> Result<DeviceAddress, BackendError> {
        self.peer.ok_or(BackendError::NotConnected)
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fake
    }

    async fn connect(
        &mut self,
        address: DeviceAddress,
        _address_type: AddressType,
    ) -> Result<(), BackendError> {
        self.disconnect();
        self.peer = Some(address);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.peer = None;
    }

    fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    #[instrument(skip(self), level = "debug")]
    async fn read_handle(&mut self, handle: AttributeHandle) -> Result<Vec<u8>, BackendError> {
        self.require_connected()?;
        self.values.get(&handle).cloned().ok_or_else(|| {
            ProtocolError::Rejected {
                message: format!("invalid handle {handle}"),
            }
            .into()
        })
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<bool, BackendError> {
        self.require_connected()?;
        self.values.insert(handle, value.to_vec());
        Ok(true)
    }

    async fn wait_for_notification(
        &mut self,
        handle: AttributeHandle,
        sink: &mut (dyn NotificationSink + Send),
        _timeout: Duration,
    ) -> Result<bool, BackendError> {
        self.require_connected()?;
        for payload in &self.notifications {
            sink.handle_notification(handle, payload);
        }
        debug!(count = self.notifications.len(), "emitted fake notifications");
        Ok(!self.notifications.is_empty())
    }

    async fn scan_for_devices(
        &self,
        _timeout: Duration,
        _adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError> {
        Ok(self.devices.clone())
    }

    async fn check_backend(&self) -> bool {
        true
    }

    fn supports_scanning(&self) -> bool {
        true
    }
}

fn parse_scan_record(raw_record: &str) -> Result<ScannedDevice, FixtureError> {
    let Some((address, name)) = raw_record.split_once('|') else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if name.contains('|') {
        return Err(FixtureError::InvalidRecordFieldCount);
    }

    let name = match name.trim() {
        "-" | "" => None,
        name => Some(name.to_string()),
    };
    Ok(ScannedDevice::new(address.trim().parse()?, name))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    const PEER: DeviceAddress = DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]);

    #[test]
    fn scan_fixture_parses_named_and_anonymous_records() {
        let fixture: ScanFixture = "C4:7C:8D:6A:3E:01|Flower care;65:B8:8C:38:D5:77|-"
            .parse()
            .expect("fixture should parse");
        let devices: Vec<ScannedDevice> = fixture.into();

        assert_eq!(
            vec![
                ScannedDevice::new(PEER, Some("Flower care".to_string())),
                ScannedDevice::new(
                    DeviceAddress::new([0x65, 0xB8, 0x8C, 0x38, 0xD5, 0x77]),
                    None
                ),
            ],
            devices
        );
    }

    #[test]
    fn scan_fixture_rejects_missing_name_field() {
        let result = "C4:7C:8D:6A:3E:01".parse::<ScanFixture>();
        assert_matches!(result, Err(FixtureError::InvalidRecordFieldCount));
    }

    #[tokio::test]
    async fn written_values_are_echoed_on_read() {
        let mut backend = FakeBackend::new(FakeBackendConfig::default());
        backend
            .connect(PEER, AddressType::Public)
            .await
            .expect("fake connect should succeed");

        let handle = AttributeHandle::new(0x33);
        let written = backend
            .write_handle(handle, &[0xA0, 0x1F])
            .await
            .expect("fake write should succeed");
        let read = backend
            .read_handle(handle)
            .await
            .expect("fake read should succeed");

        assert!(written);
        assert_eq!(vec![0xA0, 0x1F], read);
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let mut backend = FakeBackend::new(FakeBackendConfig::default());

        let result = backend.read_handle(AttributeHandle::new(0x38)).await;

        assert_matches!(result, Err(BackendError::NotConnected));
    }
}
