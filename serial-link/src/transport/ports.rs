//! Device sources built on the serial port list.
//!
//! Used where udev is unavailable, and for a port named explicitly by the
//! user. Only USB ports carry vendor/product IDs; other port types are
//! listed with zeroed IDs and left to the support predicate.

use tokio_serial::{SerialPortInfo, SerialPortType};

use super::{DeviceDescriptor, DeviceSource};
use crate::{error::Result, tracing::prelude::*};

fn descriptor_from_info(info: SerialPortInfo) -> DeviceDescriptor {
    let mut descriptor = DeviceDescriptor {
        serial_ports: vec![info.port_name.clone()],
        ..DeviceDescriptor::named(info.port_name)
    };
    if let SerialPortType::UsbPort(usb) = info.port_type {
        descriptor.vid = usb.vid;
        descriptor.pid = usb.pid;
        descriptor.serial_number = usb.serial_number;
        descriptor.manufacturer = usb.manufacturer;
        descriptor.product = usb.product;
    }
    descriptor
}

/// Enumerates USB serial ports through the OS serial port list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortSource;

impl DeviceSource for SerialPortSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let devices: Vec<_> = tokio_serial::available_ports()?
            .into_iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(descriptor_from_info)
            .collect();

        debug!(device_count = devices.len(), "Serial port enumeration complete");
        Ok(devices)
    }
}

/// A single, user-named port.
///
/// Always yields exactly one candidate. USB IDs are filled in from the port
/// list when the OS knows the port.
#[derive(Debug, Clone)]
pub struct FixedPortSource {
    path: String,
}

impl FixedPortSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl DeviceSource for FixedPortSource {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let listed = match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().find(|p| p.port_name == self.path),
            Err(e) => {
                trace!(error = %e, "Port list unavailable");
                None
            }
        };

        let descriptor = listed.map(descriptor_from_info).unwrap_or_else(|| DeviceDescriptor {
            serial_ports: vec![self.path.clone()],
            ..DeviceDescriptor::named(self.path.clone())
        });
        Ok(vec![descriptor])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_usb_ports_have_zeroed_ids() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::PciPort,
        };
        let d = descriptor_from_info(info);
        assert_eq!((d.vid, d.pid), (0, 0));
        assert_eq!(d.name, "/dev/ttyS0");
        assert_eq!(d.port_path(), Some("/dev/ttyS0"));
    }

    #[test]
    fn fixed_source_always_yields_its_port() {
        let source = FixedPortSource::new("/dev/serial-link-test-fixed");
        let devices = source.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].port_path(), Some("/dev/serial-link-test-fixed"));
    }
}
