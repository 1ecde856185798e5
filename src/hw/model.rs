use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_with::SerializeDisplay;

use crate::error::AddressParseError;

/// A 48-bit Bluetooth device address.
///
/// Stored most-significant octet first, the same order as the textual form. Parsing accepts
/// either hex case, so two addresses that differ only in case compare equal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, SerializeDisplay)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Creates an address from octets in textual (most-significant first) order.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the octets in textual order.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns the octets in on-air order (least-significant first).
    #[must_use]
    pub fn to_wire(&self) -> [u8; 6] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }

    /// Builds an address from octets received in on-air order.
    #[must_use]
    pub fn from_wire(wire: [u8; 6]) -> Self {
        let mut octets = wire;
        octets.reverse();
        Self(octets)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError::InvalidAddress {
            value: value.to_string(),
        };

        let mut octets = [0u8; 6];
        let mut parts = value.trim().split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|byte| byte.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

/// The address type the peripheral advertises with.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// Identifies one GATT attribute on the connected peripheral.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    SerializeDisplay,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("{_0:#06x}")]
pub struct AttributeHandle(u16);

impl AttributeHandle {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl FromStr for AttributeHandle {
    type Err = AddressParseError;

    /// Parses decimal or `0x`-prefixed hexadecimal handles.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex_digits) => u16::from_str_radix(hex_digits, 16),
            None => trimmed.parse::<u16>(),
        };
        parsed
            .map(Self)
            .map_err(|_| AddressParseError::InvalidHandle {
                value: value.to_string(),
            })
    }
}

/// A local adapter name such as `hci0`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, derive_more::Display)]
pub struct AdapterName(String);

impl AdapterName {
    /// Returns the adapter name verbatim.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the kernel device index for `hci<N>` names.
    ///
    /// # Errors
    ///
    /// Returns an error when the name does not follow the `hci<N>` pattern.
    pub fn device_index(&self) -> Result<u16, AddressParseError> {
        self.0
            .strip_prefix("hci")
            .filter(|digits| !digits.is_empty())
            .and_then(|digits| digits.parse::<u16>().ok())
            .ok_or_else(|| AddressParseError::InvalidAdapter {
                value: self.0.clone(),
            })
    }
}

impl Default for AdapterName {
    fn default() -> Self {
        Self("hci0".to_string())
    }
}

impl From<String> for AdapterName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AdapterName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<AdapterName> for String {
    fn from(value: AdapterName) -> Self {
        value.0
    }
}

/// One peripheral observed while scanning.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScannedDevice {
    address: DeviceAddress,
    name: Option<String>,
}

impl ScannedDevice {
    /// Creates a scan record.
    #[must_use]
    pub fn new(address: DeviceAddress, name: Option<String>) -> Self {
        Self { address, name }
    }

    /// Returns the advertised address.
    #[must_use]
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Returns the advertised local name, if one was seen.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }
}
