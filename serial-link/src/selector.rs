//! Device selection.
//!
//! Picks the device to link with: the first enumerated device the support
//! predicate accepts. Enumeration order is whatever the host reports; no
//! ranking is attempted. Selection holds no state between calls, so it is
//! re-run from scratch on every attach.

use crate::{
    error::{Error, Result},
    supported::{DriverTable, SupportPredicate},
    tracing::prelude::*,
    transport::{DeviceDescriptor, DeviceSource},
};

pub struct DeviceSelector {
    source: Box<dyn DeviceSource>,
    predicate: Box<dyn SupportPredicate>,
}

impl DeviceSelector {
    pub fn new(source: Box<dyn DeviceSource>, predicate: Box<dyn SupportPredicate>) -> Self {
        Self { source, predicate }
    }

    /// Selector using the built-in [`DriverTable`].
    pub fn with_driver_table(source: Box<dyn DeviceSource>) -> Self {
        Self::new(source, Box::new(DriverTable))
    }

    /// Enumerate attached devices and return the first supported one, with
    /// its driver filled in.
    ///
    /// Every enumerated device is logged at debug level before filtering.
    pub fn discover(&self) -> Result<DeviceDescriptor> {
        let devices = self.source.enumerate()?;

        for device in &devices {
            debug!(
                vid = %format!("{:04x}", device.vid),
                pid = %format!("{:04x}", device.pid),
                class = %format!("{:02x}", device.class),
                subclass = %format!("{:02x}", device.subclass),
                name = %device.name,
                product = ?device.product,
                "Enumerated device"
            );
        }

        let selected = devices.into_iter().find_map(|mut device| {
            let driver = self.predicate.driver_for(&device)?;
            device.driver = Some(driver);
            Some(device)
        });

        match selected {
            Some(device) => {
                info!(
                    vid = %format!("{:04x}", device.vid),
                    pid = %format!("{:04x}", device.pid),
                    driver = ?device.driver,
                    port = ?device.port_path(),
                    "Selected device"
                );
                Ok(device)
            }
            None => Err(Error::NoDeviceFound),
        }
    }
}
