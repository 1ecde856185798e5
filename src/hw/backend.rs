use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info};

use super::fake_backend::{FakeBackend, FakeBackendConfig};
use super::gatttool::GatttoolBackend;
use super::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
use crate::error::BackendError;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Transport implementations selectable at construction time.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Drives the `gatttool`/`hcitool` command-line tools.
    Gatttool,
    /// Speaks HCI and ATT directly over kernel Bluetooth sockets.
    Socket,
    /// In-memory peripheral used for tests and dry runs.
    Fake,
}

/// Receives raw notification payloads.
pub trait NotificationSink {
    /// Called once per notification frame, in arrival order.
    fn handle_notification(&mut self, handle: AttributeHandle, payload: &[u8]);
}

impl<F> NotificationSink for F
where
    F: FnMut(AttributeHandle, &[u8]),
{
    fn handle_notification(&mut self, handle: AttributeHandle, payload: &[u8]) {
        self(handle, payload);
    }
}

/// The capability set every transport implements.
///
/// An instance owns at most one peripheral session. `read_handle`, `write_handle` and
/// `wait_for_notification` fail with [`BackendError::NotConnected`] without touching the
/// transport when no session is open.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Returns which transport this is.
    fn kind(&self) -> BackendKind;

    /// Opens a session to `address`, tearing down any previous session first.
    async fn connect(
        &mut self,
        address: DeviceAddress,
        address_type: AddressType,
    ) -> Result<(), BackendError>;

    /// Releases the session. A no-op when already disconnected.
    fn disconnect(&mut self);

    /// Returns whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Reads the value of one attribute.
    async fn read_handle(&mut self, handle: AttributeHandle) -> Result<Vec<u8>, BackendError>;

    /// Writes one attribute and returns whether the transport confirmed the write.
    async fn write_handle(
        &mut self,
        handle: AttributeHandle,
        value: &[u8],
    ) -> Result<bool, BackendError>;

    /// Waits up to `timeout` for notifications on `handle`, feeding each one to `sink`.
    ///
    /// Returns whether at least one notification was observed.
    async fn wait_for_notification(
        &mut self,
        handle: AttributeHandle,
        sink: &mut (dyn NotificationSink + Send),
        timeout: Duration,
    ) -> Result<bool, BackendError>;

    /// Lists advertising peripherals seen within `timeout` on `adapter`.
    ///
    /// Only meaningful when [`Backend::supports_scanning`] returns `true`.
    async fn scan_for_devices(
        &self,
        timeout: Duration,
        adapter: &AdapterName,
    ) -> Result<Vec<ScannedDevice>, BackendError>;

    /// Probes whether the transport can be used on this host. Never fails.
    async fn check_backend(&self) -> bool;

    /// Returns whether [`Backend::scan_for_devices`] is implemented.
    fn supports_scanning(&self) -> bool;
}

/// Settings shared by all transports.
#[derive(Debug, Clone, Builder)]
pub struct BackendConfig {
    #[builder(default, into)]
    adapter: AdapterName,
    /// Wall-clock bound on each tool invocation.
    #[builder(default = DEFAULT_TOOL_TIMEOUT)]
    timeout: Duration,
    /// Additional attempts after the first one fails.
    #[builder(default = DEFAULT_RETRIES)]
    retries: u32,
    /// Pause before the first retry; doubled for each later one.
    #[builder(default = DEFAULT_RETRY_DELAY)]
    retry_delay: Duration,
    fake: Option<FakeBackendConfig>,
}

impl BackendConfig {
    #[must_use]
    pub fn adapter(&self) -> &AdapterName {
        &self.adapter
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builds the selected transport and verifies it can run on this host.
///
/// # Errors
///
/// Returns [`BackendError::Unavailable`] when the availability probe fails.
pub async fn open_backend(
    kind: BackendKind,
    config: BackendConfig,
) -> Result<Box<dyn Backend>, BackendError> {
    let backend = build_backend(kind, config)?;
    if !backend.check_backend().await {
        return Err(BackendError::Unavailable { backend: kind });
    }

    info!(%kind, "opened backend");
    Ok(backend)
}

/// Returns every transport whose availability probe passes.
pub async fn available_backends(config: &BackendConfig) -> Vec<BackendKind> {
    let mut available = Vec::new();
    for kind in BackendKind::iter() {
        let Ok(backend) = build_backend(kind, config.clone()) else {
            continue;
        };
        if backend.check_backend().await {
            available.push(kind);
        } else {
            debug!(%kind, "backend probe failed");
        }
    }
    available
}

fn build_backend(
    kind: BackendKind,
    config: BackendConfig,
) -> Result<Box<dyn Backend>, BackendError> {
    let backend: Box<dyn Backend> = match kind {
        BackendKind::Gatttool => Box::new(GatttoolBackend::new(config)),
        BackendKind::Socket => socket_backend(config)?,
        BackendKind::Fake => Box::new(FakeBackend::new(config.fake.unwrap_or_default())),
    };
    Ok(backend)
}

#[cfg(target_os = "linux")]
fn socket_backend(config: BackendConfig) -> Result<Box<dyn Backend>, BackendError> {
    Ok(Box::new(super::socket::SocketBackend::new(config)))
}

#[cfg(not(target_os = "linux"))]
fn socket_backend(_config: BackendConfig) -> Result<Box<dyn Backend>, BackendError> {
    Err(BackendError::Unavailable {
        backend: BackendKind::Socket,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("gatttool", BackendKind::Gatttool)]
    #[case("socket", BackendKind::Socket)]
    #[case("fake", BackendKind::Fake)]
    fn backend_kind_parses_lowercase_names(#[case] value: &str, #[case] expected: BackendKind) {
        assert_eq!(Ok(expected), value.parse::<BackendKind>());
        assert_eq!(value, expected.to_string());
    }

    #[test]
    fn closures_act_as_notification_sinks() {
        let mut seen = Vec::new();
        let mut sink = |handle: AttributeHandle, payload: &[u8]| {
            seen.push((handle.value(), payload.to_vec()));
        };

        sink.handle_notification(AttributeHandle::new(0x0e), &[0x01, 0x02]);

        assert_eq!(vec![(0x0e, vec![0x01, 0x02])], seen);
    }

    #[test]
    fn default_config_uses_hci0_and_three_retries() {
        let config = BackendConfig::default();

        assert_eq!("hci0", config.adapter().as_str());
        assert_eq!(3, config.retries());
        assert_eq!(Duration::from_secs(20), config.timeout());
    }

    #[tokio::test]
    async fn fake_backend_is_always_available() {
        let backend = open_backend(BackendKind::Fake, BackendConfig::default()).await;

        assert_matches!(backend, Ok(backend) if backend.kind() == BackendKind::Fake);
    }
}
