//! MooltipassClient struct and public API.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::channel::{Channel, HidChannel};
use super::dispatcher::CommandDispatcher;
use super::error::{MpError, Result};
use super::protocol::{CommandId, Packet, zero_terminated};
use super::state::{DeviceState, DeviceStatus};
use super::types::{ContextResult, Credential, Timeouts};
use crate::config::DeviceConfig;

/// Client for one Mooltipass.
///
/// Owns the channel and the cached device state for its whole lifetime.
/// Every call blocks until the device answers or the call's deadline passes.
pub struct MooltipassClient<C: Channel = HidChannel> {
    dispatcher: Option<CommandDispatcher<C>>,
    state: DeviceState,
    timeouts: Timeouts,
}

impl MooltipassClient<HidChannel> {
    /// Open the configured USB device and query its status.
    ///
    /// # Errors
    /// `MpError::DeviceNotFound` if nothing matches, `MpError::DeviceBusy` if
    /// another client already holds the device.
    pub fn open(config: &DeviceConfig, timeouts: Timeouts) -> Result<Self> {
        let channel = HidChannel::open(config)?;
        Self::with_channel(channel, timeouts)
    }
}

impl<C: Channel> MooltipassClient<C> {
    /// Wrap an already-open channel and query the device status.
    pub fn with_channel(channel: C, timeouts: Timeouts) -> Result<Self> {
        let mut client = Self {
            dispatcher: Some(CommandDispatcher::new(channel).with_poll_interval(timeouts.poll_interval)),
            state: DeviceState::Disconnected,
            timeouts,
        };

        let status = client.get_status()?;
        info!("Connected to Mooltipass, status={status:?}, state={:?}", client.state);
        Ok(client)
    }

    /// Cached device state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Release the channel. Further commands fail with a precondition error.
    pub fn close(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            info!("Closing Mooltipass channel");
            dispatcher.close();
        }
        self.state.disconnect();
    }

    /// Ping the device with two random bytes and wait for the echo.
    ///
    /// Replies that do not echo the bytes are stale and skipped.
    pub fn ping(&mut self) -> Result<()> {
        let mut nonce = [0u8; 2];
        getrandom::getrandom(&mut nonce).map_err(|e| MpError::Transport(format!("No randomness for ping: {e}")))?;
        self.ping_with(nonce)
    }

    pub(crate) fn ping_with(&mut self, nonce: [u8; 2]) -> Result<()> {
        self.state.require_connected()?;
        let deadline = Instant::now() + self.timeouts.default;

        let sent = self.dispatcher()?.send(CommandId::Ping, &nonce);
        self.track(sent)?;

        loop {
            let received = self.dispatcher()?.receive_until(deadline);
            let packet = self.track(received)?;

            if packet.command == CommandId::Ping && packet.payload.starts_with(&nonce) {
                info!("Mooltipass replied to our ping message");
                return Ok(());
            }
            warn!(
                "Ignoring stale reply {:?} {:02X?} (expected echo {:02X?})",
                packet.command, packet.payload, nonce
            );
        }
    }

    /// Firmware version payload, uninterpreted.
    pub fn get_version(&mut self) -> Result<Vec<u8>> {
        let packet = self.exchange(CommandId::GetVersion, &[], self.timeouts.default)?;
        Ok(packet.payload)
    }

    /// Select a credential context.
    pub fn set_context(&mut self, name: &str) -> Result<ContextResult> {
        let payload = zero_terminated(name)?;
        let packet = self.exchange(CommandId::SetContext, &payload, self.timeouts.context)?;
        let result = ContextResult::try_from(packet.result_byte()?)?;
        debug!("set_context({name}) -> {result:?}");
        Ok(result)
    }

    /// Set the login for the current context.
    pub fn set_login(&mut self, login: &str) -> Result<bool> {
        let payload = zero_terminated(login)?;
        self.boolean_command(CommandId::SetLogin, &payload, self.timeouts.interactive)
    }

    /// Set the password for the current context.
    pub fn set_password(&mut self, password: &str) -> Result<bool> {
        let payload = zero_terminated(password)?;
        self.boolean_command(CommandId::SetPassword, &payload, self.timeouts.interactive)
    }

    /// Create a new context.
    pub fn add_context(&mut self, name: &str) -> Result<bool> {
        let payload = zero_terminated(name)?;
        self.boolean_command(CommandId::AddContext, &payload, self.timeouts.interactive)
    }

    /// Select `context`, creating it if absent, then store `credential` in it.
    ///
    /// Returns `false` if the device refused any step.
    pub fn store_credential(&mut self, context: &str, credential: &Credential) -> Result<bool> {
        match self.set_context(context)? {
            ContextResult::KnownTrue => {}
            ContextResult::KnownFalse => {
                info!("Context {context} unknown, adding it");
                if !self.add_context(context)? {
                    return Ok(false);
                }
                if self.set_context(context)? != ContextResult::KnownTrue {
                    return Ok(false);
                }
            }
            ContextResult::NoCard => return Err(MpError::precondition("No card inserted")),
        }

        if !self.set_login(&credential.login)? {
            return Ok(false);
        }
        self.set_password(&credential.password)
    }

    /// Enter memory management mode. Requires an unlocked device.
    ///
    /// The cached state is checked before anything is sent, then revalidated
    /// with a status query.
    pub fn start_memory_management(&mut self) -> Result<bool> {
        self.state.require_unlocked()?;
        self.get_status()?;
        self.state.require_unlocked()?;

        let ok = self.boolean_command(CommandId::StartMemoryManagement, &[], self.timeouts.interactive)?;
        if ok {
            self.state.enter_memory_management()?;
        }
        Ok(ok)
    }

    /// Leave memory management mode.
    pub fn end_memory_management(&mut self) -> Result<bool> {
        self.state.require_can_leave_memory_management()?;

        let ok = self.boolean_command(CommandId::EndMemoryManagement, &[], self.timeouts.default)?;
        if ok {
            self.state.leave_memory_management()?;
        }
        Ok(ok)
    }

    /// Query the status byte and update the cached state from it.
    ///
    /// Allowed in every state while the channel is held.
    pub fn get_status(&mut self) -> Result<DeviceStatus> {
        let timeout = self.timeouts.status;
        let sent = self.dispatcher()?.exchange(CommandId::GetStatus, &[], timeout);
        let packet = self.track(sent)?;
        let status = DeviceStatus::from(packet.result_byte()?);
        self.state.observe(status);
        Ok(status)
    }

    /// Exchange with no response interpretation, for commands whose reply
    /// layout the firmware does not document.
    pub fn raw_exchange(&mut self, command: CommandId, payload: &[u8]) -> Result<Packet> {
        self.exchange(command, payload, self.timeouts.default)
    }

    fn boolean_command(&mut self, command: CommandId, payload: &[u8], timeout: Duration) -> Result<bool> {
        let packet = self.exchange(command, payload, timeout)?;
        let ok = packet.result_byte()? != 0;
        debug!("{command:?} -> {ok}");
        Ok(ok)
    }

    fn exchange(&mut self, command: CommandId, payload: &[u8], timeout: Duration) -> Result<Packet> {
        self.state.require_connected()?;
        let result = self.dispatcher()?.exchange(command, payload, timeout);
        self.track(result)
    }

    fn dispatcher(&mut self) -> Result<&mut CommandDispatcher<C>> {
        self.dispatcher
            .as_mut()
            .ok_or_else(|| MpError::precondition("Channel closed"))
    }

    /// Drop the channel on unrecoverable transport errors.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("Lost Mooltipass channel: {e}");
                self.close();
            }
        }
        result
    }
}

impl<C: Channel> Drop for MooltipassClient<C> {
    fn drop(&mut self) {
        self.close();
    }
}
