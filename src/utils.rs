use crate::error::AddressParseError;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses hexadecimal bytes, ignoring whitespace between digits.
pub(crate) fn parse_hex(value: &str) -> Result<Vec<u8>, AddressParseError> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|_| AddressParseError::InvalidHexValue {
        value: value.to_string(),
    })
}
