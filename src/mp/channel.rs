//! Raw HID channel to the device.
//!
//! The protocol layer only sees the [`Channel`] trait. [`HidChannel`] is the
//! libusb-backed implementation; platform-specific detach/reset sequencing
//! happens inside [`HidChannel::open`].

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::{debug, info, trace, warn};

use super::error::{MpError, Result};
use crate::config::DeviceConfig;

/// Write timeout for a single interrupt OUT transfer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// libusb reads a 0 ms timeout as no timeout at all.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Byte-oriented blocking channel to the token.
pub trait Channel {
    /// Write one complete frame.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Read at most `max_len` bytes, blocking up to `timeout`.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Release the underlying device. Further I/O fails.
    fn close(&mut self);
}

/// USB HID channel over libusb interrupt endpoints.
pub struct HidChannel {
    handle: Option<DeviceHandle<Context>>,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    max_packet_size: usize,
}

impl HidChannel {
    /// Find and open the configured device.
    ///
    /// # Errors
    /// `MpError::DeviceNotFound` when no device matches, `MpError::DeviceBusy`
    /// when another client already holds the interface.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        info!(
            "Searching for Mooltipass (vid={:#06x}, pid={:#06x})",
            config.vendor_id, config.product_id
        );

        let context = Context::new()?;
        let device = context
            .devices()?
            .iter()
            .find(|d| {
                d.device_descriptor()
                    .map(|desc| desc.vendor_id() == config.vendor_id && desc.product_id() == config.product_id)
                    .unwrap_or(false)
            })
            .ok_or(MpError::DeviceNotFound {
                vid: config.vendor_id,
                pid: config.product_id,
            })?;

        debug!("Found device on bus {} addr {}", device.bus_number(), device.address());

        let mut handle = device.open()?;
        prepare_handle(&mut handle, config.interface)?;

        let (endpoint_in, endpoint_out, max_packet_size) = match find_endpoints(&device, config.interface) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                let _ = handle.reset();
                return Err(e);
            }
        };

        handle.claim_interface(config.interface).map_err(|e| match e {
            rusb::Error::Busy => MpError::DeviceBusy,
            other => MpError::from(other),
        })?;

        info!("Interface {} claimed: IN={endpoint_in:#04x} OUT={endpoint_out:#04x}", config.interface);

        Ok(Self {
            handle: Some(handle),
            interface: config.interface,
            endpoint_in,
            endpoint_out,
            max_packet_size,
        })
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>> {
        self.handle
            .as_ref()
            .ok_or_else(|| MpError::Transport("Channel closed".to_string()))
    }
}

/// Linux: the kernel HID driver owns the device until detached.
#[cfg(target_os = "linux")]
fn prepare_handle(handle: &mut DeviceHandle<Context>, interface: u8) -> Result<()> {
    if handle.kernel_driver_active(interface).unwrap_or(false) {
        if let Err(e) = handle.detach_kernel_driver(interface) {
            // Probably already detached
            debug!("Kernel driver detach skipped: {e}");
        }
    }
    if let Err(e) = handle.reset() {
        debug!("Device reset skipped: {e}");
    }
    Ok(())
}

/// Other platforms: select the first configuration explicitly.
#[cfg(not(target_os = "linux"))]
fn prepare_handle(handle: &mut DeviceHandle<Context>, _interface: u8) -> Result<()> {
    handle
        .set_active_configuration(1)
        .map_err(|e| MpError::Transport(format!("Cannot set device configuration: {e}")))
}

/// Locate the first interrupt IN and OUT endpoints of `interface`.
fn find_endpoints(device: &Device<Context>, interface: u8) -> Result<(u8, u8, usize)> {
    let config = device.active_config_descriptor()?;

    let mut endpoint_in = None;
    let mut endpoint_out = None;
    let mut max_packet_size = super::protocol::FRAME_SIZE;

    for iface in config.interfaces().filter(|i| i.number() == interface) {
        for desc in iface.descriptors() {
            for endpoint in desc.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Interrupt {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if endpoint_in.is_none() => {
                        endpoint_in = Some(endpoint.address());
                        max_packet_size = endpoint.max_packet_size() as usize;
                    }
                    Direction::Out if endpoint_out.is_none() => endpoint_out = Some(endpoint.address()),
                    _ => {}
                }
            }
        }
    }

    let endpoint_out = endpoint_out.ok_or_else(|| MpError::Transport("No interrupt OUT endpoint".to_string()))?;
    let endpoint_in = endpoint_in.ok_or_else(|| MpError::Transport("No interrupt IN endpoint".to_string()))?;
    Ok((endpoint_in, endpoint_out, max_packet_size))
}

impl Channel for HidChannel {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        trace!("HID TX ({} bytes): {:02X?}", frame.len(), frame);
        let written = self.handle()?.write_interrupt(self.endpoint_out, frame, WRITE_TIMEOUT);

        match written {
            Ok(n) if n == frame.len() => Ok(()),
            Ok(n) => Err(MpError::Transport(format!("Incomplete USB write: {n}/{} bytes", frame.len()))),
            Err(rusb::Error::Timeout) => Err(MpError::Transport("USB write timed out".to_string())),
            Err(e) => Err(MpError::Transport(format!("USB write failed: {e}"))),
        }
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len.max(self.max_packet_size)];
        let timeout = timeout.max(MIN_TIMEOUT);
        let read = self.handle()?.read_interrupt(self.endpoint_in, &mut buf, timeout)?;
        buf.truncate(read.min(max_len));
        trace!("HID RX ({read} bytes): {:02X?}", buf);
        Ok(buf)
    }

    fn close(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        debug!("Releasing interface {}", self.interface);
        if let Err(e) = handle.release_interface(self.interface) {
            warn!("Failed to release interface: {e}");
        }
        self.handle = None;
    }
}

impl Drop for HidChannel {
    fn drop(&mut self) {
        self.close();
    }
}
