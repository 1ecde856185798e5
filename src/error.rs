use thiserror::Error;

use crate::hw::{BackendKind, DeviceAddress};

/// Errors returned by Backend Contract operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not connected to a peripheral")]
    NotConnected,
    #[error("a connection to {address} is already open on this manager")]
    AlreadyConnected { address: DeviceAddress },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{operation} did not complete after {attempts} attempt(s)")]
    Timeout {
        operation: &'static str,
        attempts: u32,
    },
    #[error("the {backend} backend is not available on this host")]
    Unavailable { backend: BackendKind },
    #[error("the {backend} backend does not support {operation}")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },
}

/// Errors raised while establishing or driving a transport-level session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid adapter name")]
    Adapter(#[from] AddressParseError),
    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program}` failed while running")]
    Process {
        program: String,
        source: std::io::Error,
    },
    #[error("Bluetooth socket call `{call}` failed")]
    Socket {
        call: &'static str,
        source: nix::errno::Errno,
    },
    #[error("Bluetooth socket I/O failed")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    pub(crate) fn socket(call: &'static str, source: nix::errno::Errno) -> Self {
        Self::Socket { call, source }
    }
}

/// Errors raised when the peripheral or the tool answers with something unexpected.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    #[error("unexpected ATT opcode {actual:#04x}, expected {expected:#04x}")]
    UnexpectedOpcode { expected: u8, actual: u8 },
    #[error("the peripheral sent an empty ATT reply")]
    EmptyReply,
    #[error("the peripheral rejected the request: {message}")]
    Rejected { message: String },
    #[error("{operation} produced no usable output")]
    NoData { operation: &'static str },
    #[error("value of {length} bytes exceeds the {limit}-byte attribute limit")]
    ValueTooLong { length: usize, limit: usize },
}

/// Errors returned when parsing addresses, handles and adapter names.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AddressParseError {
    #[error("`{value}` is not a colon-separated six-octet device address")]
    InvalidAddress { value: String },
    #[error("`{value}` is not a 16-bit attribute handle")]
    InvalidHandle { value: String },
    #[error("`{value}` is not an adapter name of the form `hci<N>`")]
    InvalidAdapter { value: String },
    #[error("`{value}` is not an even-length hexadecimal value")]
    InvalidHexValue { value: String },
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FixtureError {
    #[error("fixture records must contain two pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error(transparent)]
    Parse(#[from] AddressParseError),
}

/// Errors returned when command-line options contradict each other.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CliConfigError {
    #[error("`--fake-scan` and `--fake-notifications` require `--backend fake`")]
    FakeFixturesRequireFakeBackend,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
