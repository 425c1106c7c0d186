//! Physical transport layer.
//!
//! The link never talks to hardware directly. It sees devices through a
//! [`DeviceSource`], which enumerates what is attached, and reaches them
//! through a [`PortOpener`], which turns a selected descriptor into an open
//! duplex byte stream ([`Port`]). Both are traits so tests, and hosts with
//! their own USB stack, can substitute their own.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{config::LinkConfig, error::Result};

pub mod ports;
pub mod serial;
pub mod usb;

pub use ports::{FixedPortSource, SerialPortSource};
pub use serial::SerialOpener;
pub use usb::{DeviceDescriptor, UsbTransport};

#[cfg(target_os = "linux")]
pub use usb::UdevDeviceSource;

/// Enumerates devices currently attached to the host.
pub trait DeviceSource: Send + Sync {
    /// Snapshot of attached devices, in the host's enumeration order.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// An opened duplex byte channel to a device.
pub trait Port: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Port for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens a [`Port`] for a selected device.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open the device and apply `config`.
    ///
    /// Fails with [`crate::Error::Unsupported`] when no driver claims the
    /// device and [`crate::Error::OpenFailed`] when the claiming driver could
    /// not open it.
    async fn open(&self, device: &DeviceDescriptor, config: &LinkConfig) -> Result<Box<dyn Port>>;
}

/// The host's native device source: udev on Linux, the serial port list
/// elsewhere.
pub fn system_source() -> Box<dyn DeviceSource> {
    #[cfg(target_os = "linux")]
    {
        Box::new(UdevDeviceSource)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Box::new(SerialPortSource)
    }
}
