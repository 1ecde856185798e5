//! ATT request/response framing for the fixed ATT channel.

use crate::error::ProtocolError;
use crate::hw::model::AttributeHandle;

/// Receive buffer size for ATT replies.
pub(crate) const ATT_MTU: usize = 255;
/// Largest value accepted by [`write_request`].
pub(crate) const MAX_VALUE_LEN: usize = 253;

const READ_REQUEST: u8 = 0x0A;
const READ_RESPONSE: u8 = 0x0B;
const WRITE_REQUEST: u8 = 0x12;
const WRITE_RESPONSE: u8 = 0x13;

/// Encodes `opcode || handle (LE)`.
pub(crate) fn read_request(handle: AttributeHandle) -> [u8; 3] {
    let [low, high] = handle.value().to_le_bytes();
    [READ_REQUEST, low, high]
}

/// Encodes `opcode || handle (LE) || value`.
pub(crate) fn write_request(
    handle: AttributeHandle,
    value: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ProtocolError::ValueTooLong {
            length: value.len(),
            limit: MAX_VALUE_LEN,
        });
    }

    let mut frame = Vec::with_capacity(3 + value.len());
    frame.push(WRITE_REQUEST);
    frame.extend_from_slice(&handle.value().to_le_bytes());
    frame.extend_from_slice(value);
    Ok(frame)
}

/// Returns the attribute value carried by a read response.
pub(crate) fn read_response(reply: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    match reply.split_first() {
        Some((&READ_RESPONSE, value)) => Ok(value.to_vec()),
        Some((&actual, _)) => Err(ProtocolError::UnexpectedOpcode {
            expected: READ_RESPONSE,
            actual,
        }),
        None => Err(ProtocolError::EmptyReply),
    }
}

/// Accepts only the bare one-byte write response.
pub(crate) fn write_response(reply: &[u8]) -> Result<(), ProtocolError> {
    match reply {
        [WRITE_RESPONSE] => Ok(()),
        [] => Err(ProtocolError::EmptyReply),
        [actual, ..] => Err(ProtocolError::UnexpectedOpcode {
            expected: WRITE_RESPONSE,
            actual: *actual,
        }),
    }
}
