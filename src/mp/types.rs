//! Mooltipass command result types.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::error::{MpError, Result};

/// Outcome of selecting a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextResult {
    /// Context does not exist on the card.
    KnownFalse,
    /// Context selected.
    KnownTrue,
    /// No card inserted to evaluate against.
    NoCard,
}

impl TryFrom<u8> for ContextResult {
    type Error = MpError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::KnownFalse),
            1 => Ok(Self::KnownTrue),
            3 => Ok(Self::NoCard),
            other => Err(MpError::protocol(format!("Unexpected set-context result {other:#04x}"))),
        }
    }
}

/// Login/password pair. Held only for the duration of a call.
#[derive(Clone)]
pub struct Credential {
    pub login: String,
    pub password: String,
}

impl Credential {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-call deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Plain commands.
    pub default: Duration,
    /// set-context; the device may prompt for the card.
    pub context: Duration,
    /// Commands waiting on the user at the device (memory management).
    pub interactive: Duration,
    /// Non-interactive status polling.
    pub status: Duration,
    /// Pause between discarded status frames.
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(5000),
            context: Duration::from_millis(10_000),
            // Device drops out of the prompt after ~17.5 s of inaction
            interactive: Duration::from_millis(20_000),
            status: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
        }
    }
}
