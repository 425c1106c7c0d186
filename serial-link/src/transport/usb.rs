//! USB device descriptors and hotplug monitoring.
//!
//! This module describes USB devices as the Device Selector sees them and
//! turns host hotplug notifications into [`HostEvent`]s for the Link
//! Controller. It knows nothing about what the devices speak.
//!
//! ## Platform Support
//!
//! - **Linux**: udev for enumeration and hotplug monitoring
//! - **Other**: enumeration through the serial port list
//!   ([`super::ports::SerialPortSource`]); no hotplug, attach/detach must be
//!   pushed through the [`LinkHandle`]

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{error::Result, link::LinkHandle, supported::DriverKind, tracing::prelude::*};

#[cfg(target_os = "linux")]
use crate::link::HostEvent;

/// Snapshot of an attached device, taken at enumeration time.
///
/// Discarded once a Transport has been opened for it or the open was rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
    /// bDeviceClass (0x00 when the class is defined per interface)
    pub class: u8,
    /// bDeviceSubClass
    pub subclass: u8,
    /// Host device name or path (e.g., "/sys/bus/usb/devices/1-1.2")
    pub name: String,
    /// Device serial number (if available)
    pub serial_number: Option<String>,
    /// Manufacturer string (if available)
    pub manufacturer: Option<String>,
    /// Product string (if available)
    pub product: Option<String>,
    /// Serial port device nodes belonging to this device, sorted
    /// (e.g., ["/dev/ttyACM0"])
    pub serial_ports: Vec<String>,
    /// Driver that claims the device; filled in by the supported-device
    /// predicate during selection
    pub driver: Option<DriverKind>,
}

impl DeviceDescriptor {
    /// A descriptor carrying only a name; everything else defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_supported(&self) -> bool {
        self.driver.is_some()
    }

    /// Serial node to open. The first one wins when a device exposes several.
    pub fn port_path(&self) -> Option<&str> {
        self.serial_ports.first().map(String::as_str)
    }

    /// Whether a removal notification for `removed` refers to this device.
    ///
    /// udev reports removals for the device and for each of its interfaces,
    /// whose syspaths sit underneath the device's own.
    pub fn matches_removal(&self, removed: &str) -> bool {
        removed == self.name
            || removed
                .strip_prefix(self.name.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
            || self.serial_ports.iter().any(|p| p == removed)
    }
}

/// USB hotplug monitor.
pub struct UsbTransport {
    handle: LinkHandle,
}

impl UsbTransport {
    /// Create a monitor that reports into the given link.
    pub fn new(handle: LinkHandle) -> Self {
        Self { handle }
    }

    /// Start hotplug monitoring.
    ///
    /// Spawns a dedicated thread that watches for USB add/remove events and
    /// returns immediately. The udev types are !Send, so monitoring stays on
    /// one OS thread for its whole life and only plain strings cross into the
    /// link's input channel.
    ///
    /// # Shutdown
    ///
    /// The monitoring thread exits when `shutdown` is cancelled or the link's
    /// input channel closes.
    pub async fn start_discovery(&self, shutdown: CancellationToken) -> Result<()> {
        let monitor = create_monitor()?;
        let handle = self.handle.clone();

        std::thread::Builder::new()
            .name("usb-monitor".to_string())
            .spawn(move || {
                if let Err(e) = monitor.monitor_blocking(handle, shutdown) {
                    error!("USB monitoring failed: {}", e);
                }
                trace!("USB monitoring thread exiting");
            })
            .map_err(|e| {
                crate::error::Error::Other(format!("Failed to spawn USB monitor thread: {}", e))
            })?;

        trace!("USB monitor thread spawned");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::UdevDeviceSource;

/// Platform-specific hotplug monitor. Runs in a dedicated std::thread.
trait UsbMonitorImpl: Send {
    /// Watch for add/remove events until shutdown or the link goes away.
    ///
    /// Implementations must check `shutdown` at least on every event and
    /// return once it is cancelled.
    fn monitor_blocking(self: Box<Self>, handle: LinkHandle, shutdown: CancellationToken)
        -> Result<()>;
}

fn create_monitor() -> Result<Box<dyn UsbMonitorImpl>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::UdevMonitor))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(crate::error::Error::Other(
            "USB hotplug monitoring is not available on this platform".to_string(),
        ))
    }
}

/// Translate a udev action into the link's host notification.
#[cfg(target_os = "linux")]
fn host_event(added: bool, syspath: String) -> HostEvent {
    if added {
        HostEvent::DeviceAttached {
            name: Some(syspath),
        }
    } else {
        HostEvent::DeviceDetached {
            name: Some(syspath),
        }
    }
}
