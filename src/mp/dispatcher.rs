//! Synchronous request/response exchange over a [`Channel`].

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::channel::Channel;
use super::error::{MpError, Result};
use super::protocol::{CommandId, FRAME_SIZE, Packet, decode, encode};

/// Default pause between discarded status frames.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest read the USB layer can honour.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Sends one command and waits for its answer.
///
/// The protocol carries no request ids, so a response can only be matched to
/// the single outstanding request. `&mut self` on every call keeps it that way.
pub struct CommandDispatcher<C: Channel> {
    channel: C,
    in_flight: Option<CommandId>,
    poll_interval: Duration,
}

impl<C: Channel> CommandDispatcher<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            in_flight: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Encode and write one frame.
    pub fn send(&mut self, command: CommandId, payload: &[u8]) -> Result<()> {
        let frame = encode(command, payload)?;
        debug!(
            "Sending {command:?} ({} payload bytes, expecting {:?})",
            payload.len(),
            command.response_shape()
        );
        self.channel.write(&frame)?;
        self.in_flight = Some(command);
        Ok(())
    }

    /// Wait up to `timeout` for a frame that is not a status signal.
    pub fn receive(&mut self, timeout: Duration) -> Result<Packet> {
        self.receive_until(Instant::now() + timeout)
    }

    /// Wait until `deadline` for a frame that is not a status signal.
    ///
    /// Status frames arriving while the user is entering a PIN are dropped
    /// without extending the deadline. If the outstanding request is itself
    /// get-status, the status frame is the answer.
    pub fn receive_until(&mut self, deadline: Instant) -> Result<Packet> {
        let expecting_status = self.in_flight.is_some_and(CommandId::is_status_signal);

        loop {
            // libusb treats a 0 ms timeout as "wait forever"
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining < MIN_READ_TIMEOUT {
                std::thread::sleep(remaining);
                debug!("Receive deadline reached");
                return Err(MpError::Timeout);
            }

            let frame = self.channel.read(FRAME_SIZE, remaining)?;
            let packet = decode(&frame)?;
            trace!("Received {:?} payload={:02X?}", packet.command, packet.payload);

            if packet.command.is_status_signal() && !expecting_status {
                debug!("Discarding status frame {:02X?}", packet.payload);
                let pause = self.poll_interval.min(deadline.saturating_duration_since(Instant::now()));
                std::thread::sleep(pause);
                continue;
            }

            self.in_flight = None;
            return Ok(packet);
        }
    }

    /// Send a command and wait for its response.
    ///
    /// Frames answering some other command (late replies to an earlier
    /// request that timed out) are skipped within the same deadline.
    pub fn exchange(&mut self, command: CommandId, payload: &[u8], timeout: Duration) -> Result<Packet> {
        let deadline = Instant::now() + timeout;
        self.send(command, payload)?;

        loop {
            let packet = self.receive_until(deadline)?;
            if packet.command == command {
                return Ok(packet);
            }
            warn!(
                "Ignoring stale {:?} reply {:02X?} while waiting for {command:?}",
                packet.command, packet.payload
            );
            self.in_flight = Some(command);
        }
    }

    /// Release the channel.
    pub fn close(&mut self) {
        self.in_flight = None;
        self.channel.close();
    }
}
