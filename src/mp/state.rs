//! Device security state tracking.

use serde::Serialize;
use tracing::info;

use super::error::{MpError, Result};

/// Status byte reported by the get-status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// No smartcard inserted.
    NoCard,
    /// Card inserted, PIN not entered.
    Locked,
    /// Card inserted, PIN entry screen showing.
    LockedScreen,
    /// Card unlocked.
    Unlocked,
    /// Card not known to this device.
    UnknownCard,
    /// Any other byte.
    Unknown(u8),
}

impl DeviceStatus {
    pub const NO_CARD: u8 = 0x00;
    pub const LOCKED: u8 = 0x01;
    pub const LOCKED_SCREEN: u8 = 0x03;
    pub const UNLOCKED: u8 = 0x05;
    pub const UNKNOWN_CARD: u8 = 0x09;

    /// Raw status byte.
    pub fn byte(self) -> u8 {
        match self {
            Self::NoCard => Self::NO_CARD,
            Self::Locked => Self::LOCKED,
            Self::LockedScreen => Self::LOCKED_SCREEN,
            Self::Unlocked => Self::UNLOCKED,
            Self::UnknownCard => Self::UNKNOWN_CARD,
            Self::Unknown(b) => b,
        }
    }
}

impl From<u8> for DeviceStatus {
    fn from(byte: u8) -> Self {
        match byte {
            Self::NO_CARD => Self::NoCard,
            Self::LOCKED => Self::Locked,
            Self::LOCKED_SCREEN => Self::LockedScreen,
            Self::UNLOCKED => Self::Unlocked,
            Self::UNKNOWN_CARD => Self::UnknownCard,
            other => Self::Unknown(other),
        }
    }
}

/// Coarse security state of the token as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Disconnected,
    Locked,
    Unlocked,
    MemoryManagement,
}

impl DeviceState {
    /// Replace the cached state with what a fresh status byte says.
    ///
    /// A status observation always wins over the cached state, so a device
    /// that left memory management on its own timeout is detected here.
    pub fn observe(&mut self, status: DeviceStatus) -> DeviceState {
        let next = match status {
            DeviceStatus::Unlocked => Self::Unlocked,
            _ => Self::Locked,
        };
        self.transition(next);
        next
    }

    /// Refuse anything but get-status while no channel is open.
    pub fn require_connected(&self) -> Result<()> {
        match self {
            Self::Disconnected => Err(MpError::precondition("Device not connected")),
            _ => Ok(()),
        }
    }

    /// Guard for start-memory-management.
    pub fn require_unlocked(&self) -> Result<()> {
        match self {
            Self::Unlocked => Ok(()),
            other => Err(MpError::precondition(format!(
                "Cannot enter memory management mode from {other:?}; device not unlocked"
            ))),
        }
    }

    /// Guard for end-memory-management.
    ///
    /// `Unlocked` is accepted too: a status query while in the mode reports
    /// unlocked and replaces the cached state, yet the device may still be in it.
    pub fn require_can_leave_memory_management(&self) -> Result<()> {
        match self {
            Self::MemoryManagement | Self::Unlocked => Ok(()),
            other => Err(MpError::precondition(format!(
                "Cannot leave memory management mode from {other:?}"
            ))),
        }
    }

    pub fn enter_memory_management(&mut self) -> Result<()> {
        self.require_unlocked()?;
        self.transition(Self::MemoryManagement);
        Ok(())
    }

    pub fn leave_memory_management(&mut self) -> Result<()> {
        self.require_can_leave_memory_management()?;
        self.transition(Self::Unlocked);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.transition(Self::Disconnected);
    }

    fn transition(&mut self, next: DeviceState) {
        if *self != next {
            info!("Device state {:?} -> {:?}", self, next);
            *self = next;
        }
    }
}
