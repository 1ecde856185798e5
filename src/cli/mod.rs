pub(crate) mod check;
pub(crate) mod command;
pub(crate) mod gatt;
pub(crate) mod listen;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::command::{Args, BackendSettings, Command, LogLevel, OutputFormat};
pub use self::gatt::{HexValue, ReadArgs, WriteArgs};
pub use self::listen::ListenArgs;
pub use self::scan::ScanArgs;
