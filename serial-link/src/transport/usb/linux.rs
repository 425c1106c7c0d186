//! Linux udev-based USB enumeration and hotplug monitoring.
//!
//! ## Architecture
//!
//! Hotplug monitoring runs in a dedicated OS thread with its own
//! single-threaded Tokio runtime. udev types hold raw C pointers that libudev
//! requires stay on one thread, so they never cross a thread boundary; only
//! syspath strings leave this module, as [`HostEvent`](crate::link::HostEvent)s.
//!
//! Enumeration is synchronous and short-lived: the enumerator is created,
//! scanned, and dropped inside a single [`DeviceSource::enumerate`] call.
//!
//! ## Serial Port Ordering
//!
//! When a device exposes several tty nodes they are sorted by name so the
//! same node is chosen across reconnections.

use futures::stream::StreamExt;
use tokio_udev::{AsyncMonitorSocket, Device, Enumerator, EventType, MonitorBuilder};
use tokio_util::sync::CancellationToken;

use super::{host_event, DeviceDescriptor};
use crate::{
    error::{Error, Result},
    link::LinkHandle,
    tracing::prelude::*,
    transport::DeviceSource,
};

/// Read a hexadecimal sysfs attribute such as `idVendor` or `bDeviceClass`.
fn hex_attribute<T>(
    device: &Device,
    name: &str,
    parse: fn(&str, u32) -> std::result::Result<T, std::num::ParseIntError>,
) -> Result<T> {
    let raw = device
        .attribute_value(name)
        .and_then(|v| v.to_str())
        .ok_or_else(|| Error::Other(format!("Missing {} attribute", name)))?;

    parse(raw.trim(), 16).map_err(|e| Error::Other(format!("Invalid {} '{}': {}", name, raw, e)))
}

fn string_attribute(device: &Device, name: &str) -> Option<String> {
    device
        .attribute_value(name)
        .and_then(|v| v.to_str())
        .map(|s| s.trim().to_string())
}

/// Find tty nodes that descend from this USB device, sorted by name.
fn find_serial_ports(device: &Device) -> Result<Vec<String>> {
    let device_syspath = device.syspath();

    let mut enumerator = Enumerator::new()?;
    enumerator.match_subsystem("tty")?;

    let mut ports = Vec::new();
    for tty in enumerator.scan_devices()? {
        let mut current = Some(tty.clone());
        let mut is_child = false;
        while let Some(dev) = current {
            if dev.syspath() == device_syspath {
                is_child = true;
                break;
            }
            current = dev.parent();
        }

        if is_child {
            if let Some(path) = tty.devnode().and_then(|n| n.to_str()) {
                trace!(port = path, "Found serial port");
                ports.push(path.to_string());
            }
        }
    }

    ports.sort();
    Ok(ports)
}

/// Build a descriptor from a udev USB device node.
fn build_descriptor(device: &Device) -> Result<DeviceDescriptor> {
    let vid = hex_attribute(device, "idVendor", u16::from_str_radix)?;
    let pid = hex_attribute(device, "idProduct", u16::from_str_radix)?;
    // Class attributes are absent on some composite gadgets; treat as
    // "defined per interface".
    let class = hex_attribute(device, "bDeviceClass", u8::from_str_radix).unwrap_or(0);
    let subclass = hex_attribute(device, "bDeviceSubClass", u8::from_str_radix).unwrap_or(0);

    let name = device
        .syspath()
        .to_str()
        .ok_or_else(|| Error::Other("Invalid device path".to_string()))?
        .to_string();

    Ok(DeviceDescriptor {
        vid,
        pid,
        class,
        subclass,
        name,
        serial_number: string_attribute(device, "serial"),
        manufacturer: string_attribute(device, "manufacturer"),
        product: string_attribute(device, "product"),
        serial_ports: find_serial_ports(device)?,
        driver: None,
    })
}

/// Enumerates attached USB devices through udev.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevDeviceSource;

impl DeviceSource for UdevDeviceSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem("usb")?;

        let mut devices = Vec::new();
        for device in enumerator.scan_devices()? {
            // Interfaces carry no idVendor; only whole devices are candidates
            if device.attribute_value("idVendor").is_none() {
                continue;
            }

            match build_descriptor(&device) {
                Ok(descriptor) => devices.push(descriptor),
                Err(e) => trace!(error = %e, "Skipping device"),
            }
        }

        debug!(device_count = devices.len(), "USB enumeration complete");
        Ok(devices)
    }
}

/// udev hotplug monitor.
pub(super) struct UdevMonitor;

impl super::UsbMonitorImpl for UdevMonitor {
    fn monitor_blocking(
        self: Box<Self>,
        handle: LinkHandle,
        shutdown: CancellationToken,
    ) -> Result<()> {
        // udev types are !Send; a current-thread runtime keeps them on this
        // thread while still allowing select! against the shutdown token.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(watch_hotplug(handle, shutdown))
    }
}

async fn watch_hotplug(handle: LinkHandle, shutdown: CancellationToken) -> Result<()> {
    let socket = MonitorBuilder::new()?
        .match_subsystem("usb")?
        .match_subsystem("tty")?
        .listen()?;
    let mut monitor = AsyncMonitorSocket::new(socket)?;

    debug!("USB monitor created, entering event loop");

    loop {
        tokio::select! {
            event = monitor.next() => {
                let event = match event {
                    Some(Ok(e)) => e,
                    Some(Err(e)) => {
                        error!("Error from USB monitor: {}", e);
                        continue;
                    }
                    None => {
                        warn!("USB monitor stream ended");
                        return Ok(());
                    }
                };

                let device = event.device();
                let subsystem = device.subsystem().and_then(|s| s.to_str()).unwrap_or_default();
                let added = match (event.event_type(), subsystem) {
                    // The USB device appears before its tty node; only the
                    // node makes it openable
                    (EventType::Add, "tty") if device.devnode().is_some() => true,
                    (EventType::Remove, "usb") => false,
                    (other, _) => {
                        trace!(event_type = ?other, subsystem, "Ignoring udev event");
                        continue;
                    }
                };

                let Some(syspath) = device.syspath().to_str().map(str::to_string) else {
                    continue;
                };
                debug!(device_path = %syspath, added, "USB hotplug");

                if handle.notify(host_event(added, syspath)).await.is_err() {
                    info!("Link dropped, exiting USB monitor");
                    return Ok(());
                }
            }

            _ = shutdown.cancelled() => {
                debug!("Shutdown requested, exiting USB monitor");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Needs udev; run with: cargo test -p serial-link -- --ignored --nocapture
    fn enumerate_attached_devices() {
        let devices = UdevDeviceSource.enumerate().unwrap();
        for d in &devices {
            println!(
                "{:04x}:{:04x} class {:02x}:{:02x} {} {:?}",
                d.vid, d.pid, d.class, d.subclass, d.name, d.serial_ports
            );
        }
    }
}
