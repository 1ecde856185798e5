//! Backend driving BlueZ's `gatttool` and `hcitool` command-line tools.
//!
//! Every operation spawns one short-lived tool process in its own process group. A process
//! that overruns its time limit has its whole group killed and whatever it printed so far is
//! still parsed.

mod parse;
mod process;

use std::time::Duration;

use async_trait::async_trait;
use bon::bon;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

pub use self::process::{StopSignal, SystemLauncher, ToolLauncher, ToolProcess};
use super::backend::{Backend, BackendConfig, BackendKind, NotificationSink};
use super::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
use crate::error::{BackendError, ConnectionError, ProtocolError};

const DEFAULT_GATTTOOL: &str = "gatttool";
const DEFAULT_HCITOOL: &str = "hcitool";
const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a signalled tool gets to exit before its group is killed outright.
const STOP_GRACE: Duration = Duration::from_secs(2);
/// Client characteristic configuration value enabling notifications.
const NOTIFICATIONS_ON: [u8; 2] = [0x01, 0x00];
const NOTIFICATIONS_OFF: [u8; 2] = [0x00, 0x00];

/// Output captured from one tool invocation.
#[derive(Debug)]
struct ToolOutput {
    stdout: String,
    timed_out: bool,
}

/// Backend built on `gatttool` (GATT operations) and `hcitool` (scanning).
///
/// Connecting only records the peer; each operation opens its own LE link through the
/// tool.
#[derive(Debug)]
pub struct GatttoolBackend {
    config: BackendConfig,
    launcher: Box<dyn ToolLauncher>,
    gatttool: String,
    hcitool: String,
    peer: Option<(DeviceAddress, AddressType)>,
}

#[bon]
impl GatttoolBackend {
    /// Creates a backend that runs the system tools.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self::with_launcher()
            .config(config)
            .launcher(Box::new(SystemLauncher))
            .build()
    }

    /// Creates a backend with an injected process launcher and optional tool paths.
    #[builder(finish_fn = build)]
    pub fn with_launcher(
        config: BackendConfig,
        launcher: Box<dyn ToolLauncher>,
        #[builder(into, default = DEFAULT_GATTTOOL.to_string())] gatttool: String,
        #[builder(into, default = DEFAULT_HCITOOL.to_string())] hcitool: String,
    ) -> Self {
        Self {
            config,
            launcher,
            gatttool,
            hcitool,
            peer: None,
        }
    }
}

impl GatttoolBackend {
    fn require_peer(&self) -> Result<(DeviceAddress, AddressType), BackendError> {
        self.peer.ok_or(BackendError::NotConnected)
    }

    fn read_args(
        &self,
        address: DeviceAddress,
        address_type: AddressType,
        handle: AttributeHandle,
    ) -> Vec<String> {
        vec![
            format!("--device={address}"),
            format!("--addr-type={address_type}"),
            "--char-read".to_string(),
            "-a".to_string(),
            format_handle(handle),
            format!("--adapter={}", self.config.adapter()),
        ]
    }

    fn write_args(
        &self,
        address: DeviceAddress,
        address_type: AddressType,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Vec<String> {
        vec![
            format!("--device={address}"),
            format!("--addr-type={address_type}"),
            "--char-write-req".to_string(),
            "-a".to_string(),
            format_handle(handle),
            "-n".to_string(),
            hex::encode_upper(value),
            format!("--adapter={}", self.config.adapter()),
        ]
    }

    /// Runs one invocation, killing the process group with `stop` if it overruns `limit`.
    async fn run_once(
        &self,
        program: &str,
        args: &[String],
        limit: Duration,
        stop: StopSignal,
    ) -> Result<ToolOutput, BackendError> {
        let process_error = |source| ConnectionError::Process {
            program: program.to_string(),
            source,
        };

        let mut process =
            self.launcher
                .spawn(program, args)
                .map_err(|source| ConnectionError::Spawn {
                    program: program.to_string(),
                    source,
                })?;

        if let Some(stdout) = process.communicate(limit).await.map_err(process_error)? {
            return Ok(ToolOutput {
                stdout,
                timed_out: false,
            });
        }

        debug!(program, ?limit, ?stop, "tool overran its time limit");
        if let Err(error) = process.kill_group(stop) {
            debug!(?error, "failed to signal tool process group");
        }
        let stdout = match process
            .communicate(STOP_GRACE)
            .await
            .map_err(process_error)?
        {
            Some(stdout) => stdout,
            None => {
                warn!(program, ?stop, "tool ignored the stop signal, killing its process group");
                if let Err(error) = process.kill_group(StopSignal::Kill) {
                    debug!(?error, "failed to kill tool process group");
                }
                process.drain().await.map_err(process_error)?
            }
        };
        Ok(ToolOutput {
            stdout,
            timed_out: true,
        })
    }

    /// Writes `0000` to `handle` once; peripherals that need it stop notifying.
    async fn stop_listening(
        &self,
        address: DeviceAddress,
        address_type: AddressType,
        handle: AttributeHandle,
    ) {
        let args = self.write_args(address, address_type, handle, &NOTIFICATIONS_OFF);
        let confirmed = self
            .run_once(&self.gatttool, &args, self.config.timeout(), StopSignal::Kill)
            .await
            .and_then(|output| {
                parse::write_result(output.stdout.trim()).map_err(BackendError::from)
            });
        match confirmed {
            Ok(Some(_)) => debug!("switched notifications off"),
            Ok(None) => warn!("no confirmation that notifications were switched off"),
            Err(error) => warn!(?error, "failed to switch notifications off after listening"),
        }
    }

    /// Repeats an invocation until `parse` yields a value or the retry budget runs out.
    async fn run_with_retries<T, F>(
        &self,
        operation: &'static str,
        args: &[String],
        parse: F,
    ) -> Result<T, BackendError>
    where
        T: Send,
        F: Fn(&str) -> Result<Option<T>, ProtocolError> + Send + Sync,
    {
        let attempts = self.config.retries().saturating_add(1);
        let mut delay = self.config.retry_delay();
        let mut last_timed_out = false;

        for attempt in 1..=attempts {
            let output = self
                .run_once(&self.gatttool, args, self.config.timeout(), StopSignal::Kill)
                .await?;
            if let Some(value) = parse(output.stdout.trim())? {
                return Ok(value);
            }

            last_timed_out = output.timed_out;
            debug!(
                operation,
                attempt,
                timed_out = output.timed_out,
                "no usable output from gatttool"
            );
            if attempt < attempts {
                sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        warn!(operation, attempts, "giving up after retries");
        if last_timed_out {
            Err(BackendError::Timeout {
                operation,
                attempts,
            })
        } else {
            Err(ProtocolError::NoData { operation }.into())
        }
    }
}

#[async_trait]
impl Backend for GatttoolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gatttool
    }

    async fn connect(
        &mut self,
        address: DeviceAddress,
        address_type: AddressType,
    ) -> Result<(), BackendError> {
        self.disconnect();
        self.peer = Some((address, address_type));
        debug!(%address, %address_type, "recorded gatttool peer");
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
        let (address, address_type) = self.require_peer()?;
        let args = self.read_args(address, address_type, handle);
        self.run_with_retries("read", &args, parse::read_value)
            .await
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<bool, BackendError> {
        let (address, address_type) = self.require_peer()?;
        let args = self.write_args(address, address_type, handle, value);
        self.run_with_retries("write", &args, parse::write_result)
            .await
    }

    #[instrument(skip(self, sink), level = "debug")]
    async fn wait_for_notification(
        &mut self,
        handle: AttributeHandle,
        sink: &mut (dyn NotificationSink + Send),
        timeout: Duration,
    ) -> Result<bool, BackendError> {
        let (address, address_type) = self.require_peer()?;
        let mut args = self.write_args(address, address_type, handle, &NOTIFICATIONS_ON);
        args.push("--listen".to_string());

        // The listen window normally ends by running into the time limit.
        let output = self
            .run_once(&self.gatttool, &args, timeout, StopSignal::Kill)
            .await?;
        if let Some(message) = parse::write_rejection(&output.stdout) {
            return Err(ProtocolError::Rejected { message }.into());
        }

        let frames = parse::notification_frames(&output.stdout);
        if frames.is_empty() {
            if output.stdout.trim().is_empty() {
                return Err(ProtocolError::NoData {
                    operation: "notification wait",
                }
                .into());
            }
            return Ok(false);
        }

        for frame in &frames {
            sink.handle_notification(frame.handle.unwrap_or(handle), &frame.payload);
        }
        debug!(count = frames.len(), "delivered notifications");

        self.stop_listening(address, address_type, handle).await;
        Ok(true)
    }

    #[instrument(skip(self), level = "debug")]
    async fn scan_for_devices(
        &self,
        timeout: Duration,
        adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError> {
        let args = vec![
            "-i".to_string(),
            adapter.to_string(),
            "lescan".to_string(),
        ];
        // Interrupting lets hcitool switch scanning off before it exits.
        let output = self
            .run_once(&self.hcitool, &args, timeout, StopSignal::Interrupt)
            .await?;
        let devices = parse::scan_output(&output.stdout);
        debug!(count = devices.len(), "parsed scan output");
        Ok(devices)
    }

    async fn check_backend(&self) -> bool {
        let args = ["--help".to_string()];
        match self
            .run_once(&self.gatttool, &args, AVAILABILITY_PROBE_TIMEOUT, StopSignal::Kill)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                debug!(?error, "gatttool is not invocable");
                false
            }
        }
    }

    fn supports_scanning(&self) -> bool {
        true
    }
}

/// Formats a handle the way `gatttool -a` expects: two hex digits when it fits one byte.
fn format_handle(handle: AttributeHandle) -> String {
    let value = handle.value();
    if value <= 0xFF {
        format!("0x{value:02X}")
    } else {
        format!("0x{value:04X}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x0B, "0x0B")]
    #[case(0xAF, "0xAF")]
    #[case(0xAABB, "0xAABB")]
    #[case(0x0100, "0x0100")]
    fn format_handle_pads_to_one_or_two_bytes(#[case] handle: u16, #[case] expected: &str) {
        assert_eq!(expected, format_handle(AttributeHandle::new(handle)));
    }

    #[test]
    fn write_args_encode_value_as_uppercase_hex() {
        let backend = GatttoolBackend::new(BackendConfig::default());

        let args = backend.write_args(
            DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]),
            AddressType::Random,
            AttributeHandle::new(0x33),
            &[0xA0, 0x1F],
        );

        assert_eq!(
            vec![
                "--device=C4:7C:8D:6A:3E:01",
                "--addr-type=random",
                "--char-write-req",
                "-a",
                "0x33",
                "-n",
                "A01F",
                "--adapter=hci0",
            ],
            args
        );
    }

    #[tokio::test]
    async fn connect_only_records_the_peer() {
        let mut backend = GatttoolBackend::new(BackendConfig::default());
        assert!(!backend.is_connected());

        backend
            .connect(
                DeviceAddress::new([0xC4, 0x7C, 0x8D, 0x6A, 0x3E, 0x01]),
                AddressType::Public,
            )
            .await
            .expect("connect should only record the peer");
        assert!(backend.is_connected());

        backend.disconnect();
        assert!(!backend.is_connected());
        backend.disconnect();
        assert!(!backend.is_connected());
    }
}
