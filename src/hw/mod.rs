mod backend;
mod fake_backend;
mod gatttool;
mod model;
mod session;
#[cfg(target_os = "linux")]
mod socket;

pub use self::backend::{
    Backend, BackendConfig, BackendKind, NotificationSink, available_backends, open_backend,
};
pub use self::fake_backend::{FakeBackendConfig, NotificationPayloads, ScanFixture};
pub use self::gatttool::{GatttoolBackend, StopSignal, SystemLauncher, ToolLauncher, ToolProcess};
pub use self::model::{AdapterName, AddressType, AttributeHandle, DeviceAddress, ScannedDevice};
pub use self::session::{ConnectionManager, ConnectionScope};
