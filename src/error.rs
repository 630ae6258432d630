//! Error types and handling.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mp::MpError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Device communication failed
    #[error("Device error: {0}")]
    Device(#[from] MpError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output serialization failed
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Device refused an operation
    #[error("Device refused: {0}")]
    Refused(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a refused error with message
    pub fn refused(msg: impl Into<String>) -> Self {
        Self::Refused(msg.into())
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Device(MpError::DeviceNotFound { .. }) => 2,
            Self::Device(MpError::DeviceBusy) => 3,
            Self::Device(MpError::Timeout) => 4,
            Self::Device(MpError::Precondition(_)) => 5,
            Self::Config(_) => 6,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_device_errors() {
        assert_eq!(AppError::from(MpError::DeviceNotFound { vid: 1, pid: 2 }).exit_code(), 2);
        assert_eq!(AppError::from(MpError::Timeout).exit_code(), 4);
        assert_eq!(AppError::from(MpError::precondition("locked")).exit_code(), 5);
        assert_eq!(AppError::from(MpError::protocol("bad frame")).exit_code(), 1);
        assert_eq!(AppError::refused("no").exit_code(), 1);
    }

    #[test]
    fn test_device_error_message() {
        let e = AppError::from(MpError::Timeout);
        assert_eq!(e.to_string(), "Device error: Timeout waiting for response");
    }
}
