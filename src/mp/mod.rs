//! Mooltipass USB-HID protocol client.
//!
//! Talks to the token with fixed 64-byte frames over HID interrupt endpoints
//! and tracks its security state so privileged commands are only sent when
//! the device can accept them.
//!
//! # Example
//!
//! ```ignore
//! use mooltipass_hid::config::DeviceConfig;
//! use mooltipass_hid::mp::{MooltipassClient, Timeouts};
//!
//! let mut client = MooltipassClient::open(&DeviceConfig::default(), Timeouts::default())?;
//! client.ping()?;
//! let context = client.set_context("github.com")?;
//! // channel released on drop
//! ```

mod channel;
mod client;
mod dispatcher;
mod error;
mod protocol;
mod state;
mod types;


pub use channel::{Channel, HidChannel};
pub use client::MooltipassClient;
pub use dispatcher::CommandDispatcher;
pub use error::{MpError, Result};
pub use protocol::{CommandId, FRAME_SIZE, MAX_PAYLOAD, Packet, ResponseShape, decode, encode};
pub use state::{DeviceState, DeviceStatus};
pub use types::{ContextResult, Credential, Timeouts};
