//! Fixed-size frame encoding shared by host and firmware.
//!
//! ```text
//! command  (host -> device): opcode | param | value_hi | value_lo | 0 0 0 0
//! status   (device -> host): 0x05 | relay1 | relay2 | d1_hi | d1_lo | d2_hi | d2_lo | flags
//! version  (device -> host): 0x0A | major | minor | patch | 0 0 0 0
//! echo     (device -> host): 0xEE | rx0 | rx1 | rx2 | rx3 | 0 0 0
//! ```

use serde::{Deserialize, Serialize};

use super::protocol::{DeviceState, FirmwareVersion, Opcode};

/// Bytes written per command; everything past byte 3 is reserved and zeroed.
pub const COMMAND_FRAME_SIZE: usize = 8;
/// Minimum bytes the firmware needs before it interprets a command.
pub const MIN_COMMAND_LEN: usize = 2;
pub const RESPONSE_FRAME_SIZE: usize = 8;
/// Largest single transfer the firmware's USB buffers accept.
pub const MAX_TRANSFER_SIZE: usize = 64;

pub const STATUS_OPCODE: u8 = 0x05;
pub const VERSION_OPCODE: u8 = 0x0A;
pub const ECHO_OPCODE: u8 = 0xEE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: expected at least {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("unrecognized opcode: 0x{0:02X}")]
    UnrecognizedOpcode(u8),

    #[error("unrecognized response: 0x{0:02X}")]
    UnrecognizedResponse(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub opcode: u8,
    pub param: u8,
    pub value: u16,
}

impl CommandFrame {
    pub fn new(opcode: u8, param: u8, value: u16) -> Self {
        Self { opcode, param, value }
    }

    pub fn known_opcode(&self) -> Option<Opcode> {
        Opcode::from_byte(self.opcode)
    }

    pub fn encode(&self) -> [u8; COMMAND_FRAME_SIZE] {
        encode_command(self.opcode, self.param, self.value)
    }
}

pub fn encode_command(opcode: u8, param: u8, value: u16) -> [u8; COMMAND_FRAME_SIZE] {
    let mut frame = [0u8; COMMAND_FRAME_SIZE];
    frame[0] = opcode;
    frame[1] = param;
    frame[2..4].copy_from_slice(&value.to_be_bytes());
    frame
}

pub fn decode_command(bytes: &[u8]) -> Result<CommandFrame, CodecError> {
    if bytes.len() < MIN_COMMAND_LEN {
        return Err(CodecError::MalformedFrame {
            expected: MIN_COMMAND_LEN,
            actual: bytes.len(),
        });
    }

    let value = match bytes.get(2..4) {
        Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
        _ => 0,
    };

    Ok(CommandFrame {
        opcode: bytes[0],
        param: bytes[1],
        value,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFrame {
    Status(DeviceState),
    Version(FirmwareVersion),
    /// Debug acknowledgement carrying the first four received bytes.
    Echo([u8; 4]),
}

impl ResponseFrame {
    pub fn encode(&self) -> [u8; RESPONSE_FRAME_SIZE] {
        match self {
            ResponseFrame::Status(state) => {
                let d1 = state.dimmer1_value.to_be_bytes();
                let d2 = state.dimmer2_value.to_be_bytes();
                [
                    STATUS_OPCODE,
                    state.relay1 as u8,
                    state.relay2 as u8,
                    d1[0],
                    d1[1],
                    d2[0],
                    d2[1],
                    state.enable_flags(),
                ]
            }
            ResponseFrame::Version(v) => [VERSION_OPCODE, v.major, v.minor, v.patch, 0, 0, 0, 0],
            ResponseFrame::Echo(rx) => [ECHO_OPCODE, rx[0], rx[1], rx[2], rx[3], 0, 0, 0],
        }
    }

    /// Whether this is the frame the firmware sends in reply to `opcode`.
    pub fn answers(&self, opcode: Opcode) -> bool {
        matches!(
            (self, opcode),
            (ResponseFrame::Status(_), Opcode::GetStatus) | (ResponseFrame::Version(_), Opcode::GetVersion)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResponseFrame::Status(_) => "status",
            ResponseFrame::Version(_) => "version",
            ResponseFrame::Echo(_) => "echo",
        }
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<ResponseFrame, CodecError> {
    let Some(&opcode) = bytes.first() else {
        return Err(CodecError::MalformedFrame {
            expected: RESPONSE_FRAME_SIZE,
            actual: 0,
        });
    };

    if !matches!(opcode, STATUS_OPCODE | VERSION_OPCODE | ECHO_OPCODE) {
        return Err(CodecError::UnrecognizedResponse(opcode));
    }

    if bytes.len() < RESPONSE_FRAME_SIZE {
        return Err(CodecError::MalformedFrame {
            expected: RESPONSE_FRAME_SIZE,
            actual: bytes.len(),
        });
    }

    let frame = match opcode {
        STATUS_OPCODE => ResponseFrame::Status(DeviceState {
            relay1: bytes[1] != 0,
            relay2: bytes[2] != 0,
            dimmer1_value: u16::from_be_bytes([bytes[3], bytes[4]]),
            dimmer2_value: u16::from_be_bytes([bytes[5], bytes[6]]),
            dimmer1_enabled: bytes[7] & 0x02 != 0,
            dimmer2_enabled: bytes[7] & 0x01 != 0,
        }),
        VERSION_OPCODE => ResponseFrame::Version(FirmwareVersion::new(bytes[1], bytes[2], bytes[3])),
        _ => ResponseFrame::Echo([bytes[1], bytes[2], bytes[3], bytes[4]]),
    };

    Ok(frame)
}

/// Decode every whole 8-byte frame in one transport read.
///
/// A trailing partial chunk is reported as `MalformedFrame` and dropped.
pub fn decode_responses(bytes: &[u8]) -> Vec<Result<ResponseFrame, CodecError>> {
    bytes.chunks(RESPONSE_FRAME_SIZE).map(decode_response).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command_layout() {
        let frame = encode_command(0x03, 0x00, 0x1000);
        assert_eq!(frame, [0x03, 0x00, 0x10, 0x00, 0, 0, 0, 0]);
    }

    #[test]
    fn test_decode_command_short_frame() {
        assert_eq!(
            decode_command(&[0x01]),
            Err(CodecError::MalformedFrame { expected: 2, actual: 1 })
        );
        assert!(decode_command(&[]).is_err());
    }

    #[test]
    fn test_decode_command_without_value() {
        let frame = decode_command(&[0x01, 0x01]).unwrap();
        assert_eq!(frame, CommandFrame::new(0x01, 0x01, 0));

        // A lone third byte is not a value
        let frame = decode_command(&[0x03, 0x00, 0x12]).unwrap();
        assert_eq!(frame.value, 0);
    }

    #[test]
    fn test_decode_command_ignores_reserved_bytes() {
        let frame = decode_command(&[0x04, 0x00, 0x0F, 0xFF, 0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(frame, CommandFrame::new(0x04, 0x00, 0x0FFF));
    }

    #[test]
    fn test_decode_status_response() {
        let frame = decode_response(&[0x05, 0x01, 0x00, 0x0F, 0xFF, 0x08, 0x00, 0x02]).unwrap();
        assert_eq!(
            frame,
            ResponseFrame::Status(DeviceState {
                relay1: true,
                relay2: false,
                dimmer1_value: 4095,
                dimmer2_value: 2048,
                dimmer1_enabled: true,
                dimmer2_enabled: false,
            })
        );
    }

    #[test]
    fn test_decode_version_and_echo() {
        let frame = decode_response(&[0x0A, 2, 0, 1, 0, 0, 0, 0]).unwrap();
        assert_eq!(frame, ResponseFrame::Version(FirmwareVersion::new(2, 0, 1)));

        let frame = decode_response(&[0xEE, 0x01, 0x01, 0x00, 0x00, 0, 0, 0]).unwrap();
        assert_eq!(frame, ResponseFrame::Echo([0x01, 0x01, 0x00, 0x00]));
    }

    #[test]
    fn test_decode_unrecognized_response() {
        // Boot greeting text starts with "\r\n="
        assert_eq!(
            decode_response(b"\r\n=== PowerPack"),
            Err(CodecError::UnrecognizedResponse(b'\r'))
        );
        assert_eq!(
            decode_response(&[0x01, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::UnrecognizedResponse(0x01))
        );
    }

    #[test]
    fn test_decode_truncated_known_response() {
        assert_eq!(
            decode_response(&[0x05, 0x01, 0x00]),
            Err(CodecError::MalformedFrame { expected: 8, actual: 3 })
        );
    }

    #[test]
    fn test_decode_responses_splits_chunks() {
        let mut bytes = ResponseFrame::Status(DeviceState::default()).encode().to_vec();
        bytes.extend_from_slice(&ResponseFrame::Echo([5, 0, 0, 0]).encode());
        bytes.extend_from_slice(&[0x05, 0x00]);

        let frames = decode_responses(&bytes);
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Ok(ResponseFrame::Status(_))));
        assert!(matches!(frames[1], Ok(ResponseFrame::Echo(_))));
        assert!(matches!(frames[2], Err(CodecError::MalformedFrame { .. })));
    }
}
