//! Supported-device predicate.
//!
//! Decides whether an enumerated device has a usable serial driver. The
//! built-in [`DriverTable`] knows the common USB-to-UART bridge families by
//! vendor/product ID and falls back to the generic CDC-ACM driver for devices
//! that expose a serial node under an unknown vendor.
//!
//! The driver kind is carried on the descriptor so that an open failure can be
//! reported as CDC-specific ("the generic driver matched but doesn't fit this
//! device") or as a plain device fault.

use serde::Serialize;
use strum::Display;

use crate::transport::DeviceDescriptor;

/// Serial driver family that claims a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum DriverKind {
    /// USB communications device class, abstract control model
    #[strum(serialize = "CDC")]
    Cdc,
    #[strum(serialize = "FTDI")]
    Ftdi,
    #[strum(serialize = "CP210x")]
    Cp210x,
    #[strum(serialize = "CH34x")]
    Ch34x,
    #[strum(serialize = "PL2303")]
    Pl2303,
}

/// USB vendor ID of Linux root hubs.
const ROOT_HUB_VID: u16 = 0x1d6b;

struct DriverEntry {
    vid: u16,
    /// `None` matches every product of the vendor
    pid: Option<u16>,
    driver: DriverKind,
}

const fn entry(vid: u16, pid: Option<u16>, driver: DriverKind) -> DriverEntry {
    DriverEntry { vid, pid, driver }
}

#[rustfmt::skip]
const DRIVER_TABLE: &[DriverEntry] = &[
    // FTDI: FT232R, FT2232, FT4232H, FT232H, FT-X
    entry(0x0403, None, DriverKind::Ftdi),
    // Silicon Labs CP210x
    entry(0x10c4, Some(0xea60), DriverKind::Cp210x),
    entry(0x10c4, Some(0xea70), DriverKind::Cp210x),
    entry(0x10c4, Some(0xea71), DriverKind::Cp210x),
    entry(0x10c4, Some(0xea80), DriverKind::Cp210x),
    // WCH CH340/CH341
    entry(0x1a86, Some(0x7523), DriverKind::Ch34x),
    entry(0x1a86, Some(0x5523), DriverKind::Ch34x),
    entry(0x1a86, Some(0x7522), DriverKind::Ch34x),
    // Prolific PL2303
    entry(0x067b, Some(0x2303), DriverKind::Pl2303),
    entry(0x067b, Some(0x23a3), DriverKind::Pl2303),
    // Arduino boards with native USB enumerate as CDC-ACM
    entry(0x2341, None, DriverKind::Cdc),
    entry(0x2a03, None, DriverKind::Cdc),
    // PJRC Teensy serial
    entry(0x16c0, Some(0x0483), DriverKind::Cdc),
];

/// Capability check run against every enumerated device.
pub trait SupportPredicate: Send + Sync {
    /// Driver that would claim this device, or `None` if unsupported.
    fn driver_for(&self, device: &DeviceDescriptor) -> Option<DriverKind>;

    fn is_supported(&self, device: &DeviceDescriptor) -> bool {
        self.driver_for(device).is_some()
    }
}

impl<F> SupportPredicate for F
where
    F: Fn(&DeviceDescriptor) -> Option<DriverKind> + Send + Sync,
{
    fn driver_for(&self, device: &DeviceDescriptor) -> Option<DriverKind> {
        self(device)
    }
}

/// Built-in driver table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverTable;

impl SupportPredicate for DriverTable {
    fn driver_for(&self, device: &DeviceDescriptor) -> Option<DriverKind> {
        if device.vid == ROOT_HUB_VID {
            return None;
        }

        let known = DRIVER_TABLE
            .iter()
            .find(|e| e.vid == device.vid && e.pid.map_or(true, |pid| pid == device.pid))
            .map(|e| e.driver);
        if known.is_some() {
            return known;
        }

        // Unknown vendor: usable only through the generic CDC driver, which
        // needs a serial node to talk to.
        if device.serial_ports.is_empty() {
            None
        } else {
            Some(DriverKind::Cdc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(vid: u16, pid: u16, ports: &[&str]) -> DeviceDescriptor {
        DeviceDescriptor {
            vid,
            pid,
            serial_ports: ports.iter().map(|p| p.to_string()).collect(),
            ..DeviceDescriptor::named("/sys/bus/usb/devices/1-1")
        }
    }

    #[test]
    fn root_hubs_are_never_supported() {
        let hub = device(0x1d6b, 0x0002, &["/dev/ttyACM0"]);
        assert_eq!(DriverTable.driver_for(&hub), None);
    }

    #[test]
    fn vendor_wide_entries_match_any_product() {
        let ftdi = device(0x0403, 0x6015, &[]);
        assert_eq!(DriverTable.driver_for(&ftdi), Some(DriverKind::Ftdi));

        let uno = device(0x2341, 0x0043, &["/dev/ttyACM0"]);
        assert_eq!(DriverTable.driver_for(&uno), Some(DriverKind::Cdc));
    }

    #[test]
    fn product_entries_require_exact_match() {
        let ch340 = device(0x1a86, 0x7523, &[]);
        assert_eq!(DriverTable.driver_for(&ch340), Some(DriverKind::Ch34x));

        let other = device(0x1a86, 0xe008, &[]);
        assert_eq!(DriverTable.driver_for(&other), None);
    }

    #[test]
    fn unknown_vendor_falls_back_to_cdc_when_it_has_a_serial_node() {
        let with_node = device(0x1234, 0x5678, &["/dev/ttyACM3"]);
        assert_eq!(DriverTable.driver_for(&with_node), Some(DriverKind::Cdc));

        let without_node = device(0x1234, 0x5678, &[]);
        assert!(!DriverTable.is_supported(&without_node));
    }

    #[test]
    fn closures_act_as_predicates() {
        let only_ftdi = |d: &DeviceDescriptor| (d.vid == 0x0403).then_some(DriverKind::Ftdi);
        assert!(only_ftdi.is_supported(&device(0x0403, 0x6001, &[])));
        assert!(!only_ftdi.is_supported(&device(0x2341, 0x0043, &["/dev/ttyACM0"])));
    }
}
