//! Backend speaking HCI and ATT directly over kernel Bluetooth sockets.
//!
//! A connection owns two sockets: a raw HCI control socket used to unmask LE events, and an
//! L2CAP socket on the peer's fixed ATT channel. Both are closed on disconnect and whenever
//! connecting fails part way.

mod att;
mod hci;
mod sys;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, trace, warn};

use self::hci::HciCommand;
use self::sys::BluetoothSocket;
use super::backend::{Backend, BackendConfig, BackendKind, NotificationSink};
use super::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
use crate::error::{BackendError, ConnectionError};

#[derive(Debug)]
struct Link {
    peer: DeviceAddress,
    // Held open for the lifetime of the link.
    _control: BluetoothSocket,
    att: BluetoothSocket,
}

/// Raw-socket driver for Linux BlueZ adapters.
#[derive(Debug)]
pub(crate) struct SocketBackend {
    config: BackendConfig,
    link: Option<Link>,
}

impl SocketBackend {
    pub(crate) fn new(config: BackendConfig) -> Self {
        Self { config, link: None }
    }

    fn require_link(&self) -> Result<&Link, BackendError> {
        self.link.as_ref().ok_or(BackendError::NotConnected)
    }

    /// Sends one ATT request and waits for its reply within the configured timeout.
    ///
    /// A link that fails at the transport level is torn down.
    async fn transact(
        &mut self,
        operation: &'static str,
        request: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        let limit = self.config.timeout();
        let link = self.require_link()?;
        let exchange = async {
            link.att.send(request).await?;
            let mut reply = [0u8; att::ATT_MTU];
            let length = link.att.recv(&mut reply).await?;
            io::Result::Ok(reply[..length].to_vec())
        };

        let result = match timeout(limit, exchange).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(error)) => BackendError::from(ConnectionError::from(error)),
            Err(_elapsed) => BackendError::Timeout {
                operation,
                attempts: 1,
            },
        };
        warn!(operation, error = %result, "dropping ATT link");
        self.disconnect();
        Err(result)
    }
}

#[async_trait]
impl Backend for SocketBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Socket
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(
        &mut self,
        address: DeviceAddress,
        address_type: AddressType,
    ) -> Result<(), BackendError> {
        self.disconnect();

        let device = self
            .config
            .adapter()
            .device_index()
            .map_err(ConnectionError::from)?;
        let control = BluetoothSocket::hci(device)?;
        enable_le_events(&control).await?;

        let att = timeout(
            self.config.timeout(),
            BluetoothSocket::l2cap(address, address_type),
        )
        .await
        .map_err(|_elapsed| BackendError::Timeout {
            operation: "connect",
            attempts: 1,
        })??;

        info!(%address, %address_type, "ATT channel open");
        self.link = Some(Link {
            peer: address,
            _control: control,
            att,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            debug!(peer = %link.peer, "closing ATT link");
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn read_handle(&mut self, handle: AttributeHandle) -> Result<Vec<u8>, BackendError> {
        let reply = self.transact("read", &att::read_request(handle)).await?;
        Ok(att::read_response(&reply)?)
    }

    async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<bool, BackendError> {
        self.require_link()?;
        let request = att::write_request(handle, value)?;
        let reply = self.transact("write", &request).await?;
        att::write_response(&reply)?;
        Ok(true)
    }

    async fn wait_for_notification(
        &mut self,
        _handle: AttributeHandle,
        _sink: &mut (dyn NotificationSink + Send),
        _timeout: Duration,
    ) -> Result<bool, BackendError> {
        self.require_link()?;
        Err(BackendError::Unsupported {
            backend: BackendKind::Socket,
            operation: "notifications",
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan_for_devices(
        &self,
        timeout: Duration,
        adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError> {
        let device = adapter.device_index().map_err(ConnectionError::from)?;
        let control = BluetoothSocket::hci(device)?;
        enable_le_events(&control).await?;

        send_command(&control, HciCommand::scan_enable(false)).await?;
        send_command(
            &control,
            HciCommand::LeSetScanParameters(hci::ScanParameters::default()),
        )
        .await?;
        send_command(&control, HciCommand::scan_enable(true)).await?;

        let devices = collect_reports(&control, timeout).await;
        if let Err(error) = send_command(&control, HciCommand::scan_enable(false)).await {
            warn!(?error, "failed to switch LE scanning off");
        }

        let devices = devices?;
        debug!(count = devices.len(), "scan finished");
        Ok(devices)
    }

    async fn check_backend(&self) -> bool {
        match BluetoothSocket::probe() {
            Ok(()) => true,
            Err(error) => {
                debug!(?error, "Bluetooth sockets are unavailable");
                false
            }
        }
    }

    fn supports_scanning(&self) -> bool {
        true
    }
}

async fn send_command(control: &BluetoothSocket, command: HciCommand) -> Result<(), BackendError> {
    control
        .send(&command.encode()?)
        .await
        .map_err(|error| ConnectionError::from(error).into())
}

/// Unmasks LE meta events; lacking privilege to do so is tolerated.
async fn enable_le_events(control: &BluetoothSocket) -> Result<(), BackendError> {
    for command in HciCommand::le_event_bring_up() {
        match control.send(&command.encode()?).await {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::PermissionDenied => {
                debug!(?command, "not permitted to set event mask, continuing");
            }
            Err(error) => return Err(ConnectionError::from(error).into()),
        }
    }
    Ok(())
}

/// Reads advertising reports until `budget` has elapsed.
async fn collect_reports(
    control: &BluetoothSocket,
    mut budget: Duration,
) -> Result<Vec<ScannedDevice>, BackendError> {
    let mut devices = Vec::new();
    let mut frame = [0u8; hci::HCI_MAX_FRAME];
    let mut last_read = Instant::now();

    while !budget.is_zero() {
        let received = timeout(budget, control.recv(&mut frame)).await;
        let now = Instant::now();
        budget = budget.saturating_sub(now - last_read);
        last_read = now;

        let length = match received {
            Ok(length) => length.map_err(ConnectionError::from)?,
            Err(_elapsed) => continue,
        };
        absorb_frame(&mut devices, &frame[..length]);
    }
    Ok(devices)
}

/// Folds one HCI event into the scan results; anything but an advertising report is dropped.
fn absorb_frame(devices: &mut Vec<ScannedDevice>, frame: &[u8]) {
    match hci::advertising_report(frame) {
        Some(report) => hci::record_report(devices, report),
        None => trace!(length = frame.len(), "ignoring non-advertising HCI event"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const FLOWER_CARE: DeviceAddress = DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]);
    const THERMOMETER: DeviceAddress = DeviceAddress::new([0x65, 0xB8, 0x8C, 0x38, 0xD5, 0x77]);

    fn advertising_event(address: DeviceAddress, name: Option<&str>) -> Vec<u8> {
        let mut data = vec![0x02, 0x01, 0x06];
        if let Some(name) = name {
            data.push(u8::try_from(name.len() + 1).expect("test name fits"));
            data.push(0x09);
            data.extend_from_slice(name.as_bytes());
        }

        let mut frame = vec![hci::HCI_EVENT_PKT, hci::LE_META_EVENT, 0x00, 0x02, 0x01, 0x00, 0x00];
        frame.extend_from_slice(&address.to_wire());
        frame.push(u8::try_from(data.len()).expect("test data fits"));
        frame.extend_from_slice(&data);
        frame
    }

    #[test]
    fn scan_keeps_the_last_report_per_address() {
        let command_complete = [hci::HCI_EVENT_PKT, 0x0E, 0x04, 0x01, 0x0C, 0x20, 0x00];
        let frames = [
            advertising_event(FLOWER_CARE, Some("Flower care")),
            command_complete.to_vec(),
            advertising_event(THERMOMETER, None),
            Vec::new(),
            advertising_event(THERMOMETER, Some("LYWSD03MMC")),
            advertising_event(FLOWER_CARE, None),
        ];

        let mut devices = Vec::new();
        for frame in &frames {
            absorb_frame(&mut devices, frame);
        }

        assert_eq!(
            vec![
                ScannedDevice::new(FLOWER_CARE, None),
                ScannedDevice::new(THERMOMETER, Some("LYWSD03MMC".to_string())),
            ],
            devices
        );
    }

    #[test]
    fn non_advertising_events_leave_results_untouched() {
        let mut devices = vec![ScannedDevice::new(FLOWER_CARE, Some("Flower care".to_string()))];

        absorb_frame(&mut devices, &[hci::HCI_EVENT_PKT, hci::LE_META_EVENT, 0x0B, 0x01]);
        absorb_frame(&mut devices, &[hci::HCI_EVENT_PKT, 0x05, 0x04, 0x00]);

        assert_eq!(
            vec![ScannedDevice::new(FLOWER_CARE, Some("Flower care".to_string()))],
            devices
        );
    }
}
