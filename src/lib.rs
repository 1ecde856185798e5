mod app;
mod cli;
mod error;
mod hw;
mod telemetry;
mod terminal;
mod utils;

pub use app::{run, run_with_clients};
pub use cli::{
    Args, BackendSettings, Command, HexValue, ListenArgs, LogLevel, OutputFormat, ReadArgs,
    ScanArgs, WriteArgs,
};
pub use error::{
    AddressParseError, BackendError, CliConfigError, ConnectionError, FixtureError, ProtocolError,
};
pub use hw::{
    AdapterName, AddressType, AttributeHandle, Backend, BackendConfig, BackendKind,
    ConnectionManager, ConnectionScope, DeviceAddress, FakeBackendConfig, GatttoolBackend,
    NotificationPayloads, NotificationSink, ScanFixture, ScannedDevice, StopSignal,
    SystemLauncher, ToolLauncher, ToolProcess, available_backends, open_backend,
};
pub use terminal::TerminalClient;
