//! Mooltipass HID packet building and parsing.

use super::error::{MpError, Result};

/// Every HID report exchanged with the device is exactly this long.
pub const FRAME_SIZE: usize = 64;

/// Maximum payload bytes per frame (frame minus length and command bytes).
pub const MAX_PAYLOAD: usize = FRAME_SIZE - 2;

/// Offset of the payload length byte.
const LEN_INDEX: usize = 0;
/// Offset of the command byte.
const CMD_INDEX: usize = 1;
/// Offset of the first payload byte.
const DATA_INDEX: usize = 2;

/// How a command's response payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Payload echoes the request payload.
    Echo,
    /// Payload returned to the caller as-is.
    Raw,
    /// Tri-state result byte (0, 1 or 3).
    ContextResult,
    /// Result byte, non-zero means success.
    Boolean,
    /// Single device status byte.
    StatusByte,
    /// Firmware documents no response layout.
    Undocumented,
}

/// One-byte command identifiers, fixed by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    Ping = 0xA1,
    GetVersion = 0xA2,
    SetContext = 0xA3,
    GetLogin = 0xA4,
    GetPassword = 0xA5,
    SetLogin = 0xA6,
    SetPassword = 0xA7,
    CheckPassword = 0xA8,
    AddContext = 0xA9,
    SetBootloaderPassword = 0xAA,
    JumpToBootloader = 0xAB,
    GetRandomNumber = 0xAC,
    StartMemoryManagement = 0xAD,
    GetStatus = 0xB9,
    EndMemoryManagement = 0xD3,
}

impl CommandId {
    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Expected response shape.
    pub fn response_shape(self) -> ResponseShape {
        match self {
            Self::Ping => ResponseShape::Echo,
            Self::GetVersion => ResponseShape::Raw,
            Self::SetContext => ResponseShape::ContextResult,
            Self::SetLogin | Self::SetPassword | Self::AddContext => ResponseShape::Boolean,
            Self::StartMemoryManagement | Self::EndMemoryManagement => ResponseShape::Boolean,
            Self::GetStatus => ResponseShape::StatusByte,
            Self::GetLogin
            | Self::GetPassword
            | Self::CheckPassword
            | Self::SetBootloaderPassword
            | Self::JumpToBootloader
            | Self::GetRandomNumber => ResponseShape::Undocumented,
        }
    }

    /// Whether this frame is the unsolicited "still entering PIN" signal.
    pub fn is_status_signal(self) -> bool {
        self == Self::GetStatus
    }
}

impl TryFrom<u8> for CommandId {
    type Error = MpError;

    fn try_from(code: u8) -> Result<Self> {
        let cmd = match code {
            0xA1 => Self::Ping,
            0xA2 => Self::GetVersion,
            0xA3 => Self::SetContext,
            0xA4 => Self::GetLogin,
            0xA5 => Self::GetPassword,
            0xA6 => Self::SetLogin,
            0xA7 => Self::SetPassword,
            0xA8 => Self::CheckPassword,
            0xA9 => Self::AddContext,
            0xAA => Self::SetBootloaderPassword,
            0xAB => Self::JumpToBootloader,
            0xAC => Self::GetRandomNumber,
            0xAD => Self::StartMemoryManagement,
            0xB9 => Self::GetStatus,
            0xD3 => Self::EndMemoryManagement,
            other => return Err(MpError::protocol(format!("Unknown command id {other:#04x}"))),
        };
        Ok(cmd)
    }
}

/// Decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: CommandId,
    pub payload: Vec<u8>,
}

impl Packet {
    /// First payload byte, where the device puts its result code.
    pub fn result_byte(&self) -> Result<u8> {
        self.payload
            .first()
            .copied()
            .ok_or_else(|| MpError::protocol(format!("Empty response to {:?}", self.command)))
    }
}

/// Build a frame.
///
/// Frame structure:
/// - Byte 0: payload length (0-62)
/// - Byte 1: command id
/// - Bytes 2..2+len: payload
/// - Remainder: zero padding
pub fn encode(command: CommandId, payload: &[u8]) -> Result<[u8; FRAME_SIZE]> {
    if payload.len() > MAX_PAYLOAD {
        return Err(MpError::protocol(format!(
            "Payload too large: {} bytes (max {MAX_PAYLOAD})",
            payload.len()
        )));
    }

    let mut frame = [0u8; FRAME_SIZE];
    frame[LEN_INDEX] = payload.len() as u8;
    frame[CMD_INDEX] = command.code();
    frame[DATA_INDEX..DATA_INDEX + payload.len()].copy_from_slice(payload);
    Ok(frame)
}

/// Parse a frame received from the device.
///
/// The declared length is authoritative; bytes past it are padding.
pub fn decode(frame: &[u8]) -> Result<Packet> {
    if frame.len() < DATA_INDEX {
        return Err(MpError::protocol(format!("Frame too small: {} bytes", frame.len())));
    }

    let len = frame[LEN_INDEX] as usize;
    if len > MAX_PAYLOAD {
        return Err(MpError::protocol(format!("Declared length {len} exceeds {MAX_PAYLOAD}")));
    }
    if frame.len() < DATA_INDEX + len {
        return Err(MpError::protocol(format!(
            "Incomplete frame: declared {len} payload bytes, got {}",
            frame.len() - DATA_INDEX
        )));
    }

    Ok(Packet {
        command: CommandId::try_from(frame[CMD_INDEX])?,
        payload: frame[DATA_INDEX..DATA_INDEX + len].to_vec(),
    })
}

/// Build a NUL-terminated string payload.
pub fn zero_terminated(value: &str) -> Result<Vec<u8>> {
    if value.as_bytes().contains(&0) {
        return Err(MpError::protocol("String contains an interior NUL byte"));
    }
    if value.len() + 1 > MAX_PAYLOAD {
        return Err(MpError::protocol(format!(
            "String too long: {} bytes (max {})",
            value.len(),
            MAX_PAYLOAD - 1
        )));
    }

    let mut payload = Vec::with_capacity(value.len() + 1);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    Ok(payload)
}
