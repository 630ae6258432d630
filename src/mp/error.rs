//! Mooltipass protocol error types.

use thiserror::Error;

/// Errors that can occur while talking to a Mooltipass.
#[derive(Error, Debug)]
pub enum MpError {
    /// No device with the configured vendor/product id is attached.
    #[error("Mooltipass not found (vid={vid:#06x}, pid={pid:#06x})")]
    DeviceNotFound { vid: u16, pid: u16 },

    /// The HID interface is already claimed by another client.
    #[error("Device is busy: interface already claimed")]
    DeviceBusy,

    /// USB-level I/O failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No qualifying response before the deadline.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Malformed frame, oversized payload or unexpected result byte.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command attempted from a state that does not allow it.
    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl MpError {
    /// Create a protocol error with message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a precondition error with message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Whether the channel should be considered lost after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::DeviceNotFound { .. })
    }
}

impl From<rusb::Error> for MpError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::Busy => Self::DeviceBusy,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Result type for Mooltipass protocol operations.
pub type Result<T> = std::result::Result<T, MpError>;
