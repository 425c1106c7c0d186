//! Serial port opener built on `tokio-serial`.

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;

use super::{DeviceDescriptor, Port, PortOpener};
use crate::{
    config::{FlowControl, LinkConfig, Parity},
    error::{Error, Result},
    tracing::prelude::*,
};

fn to_serial_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn to_serial_flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

/// Anything other than 5, 6 or 7 is treated as 8.
fn to_serial_data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn to_serial_stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

/// Opens the first serial node of a device with the link's framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

#[async_trait]
impl PortOpener for SerialOpener {
    async fn open(&self, device: &DeviceDescriptor, config: &LinkConfig) -> Result<Box<dyn Port>> {
        let unsupported = || Error::Unsupported {
            vid: device.vid,
            pid: device.pid,
        };
        let driver = device.driver.ok_or_else(unsupported)?;
        let path = device.port_path().ok_or_else(unsupported)?;

        debug!(
            port = path,
            %driver,
            baud = config.baud_rate,
            "Opening serial port"
        );

        let stream = tokio_serial::new(path, config.baud_rate)
            .data_bits(to_serial_data_bits(config.data_bits))
            .stop_bits(to_serial_stop_bits(config.stop_bits))
            .parity(to_serial_parity(config.parity))
            .flow_control(to_serial_flow_control(config.flow_control))
            .open_native_async()
            .map_err(|e| Error::OpenFailed {
                driver,
                reason: e.to_string(),
            })?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supported::DriverKind;

    #[test]
    fn framing_conversions() {
        assert_eq!(to_serial_data_bits(7), tokio_serial::DataBits::Seven);
        assert_eq!(to_serial_data_bits(9), tokio_serial::DataBits::Eight);
        assert_eq!(to_serial_stop_bits(2), tokio_serial::StopBits::Two);
        assert_eq!(to_serial_stop_bits(0), tokio_serial::StopBits::One);
        assert_eq!(to_serial_parity(Parity::Even), tokio_serial::Parity::Even);
        assert_eq!(
            to_serial_flow_control(FlowControl::None),
            tokio_serial::FlowControl::None
        );
    }

    #[tokio::test]
    async fn device_without_driver_is_unsupported() {
        let device = DeviceDescriptor {
            vid: 0x1d6b,
            pid: 0x0002,
            ..DeviceDescriptor::named("/sys/bus/usb/devices/usb1")
        };
        let result = SerialOpener.open(&device, &LinkConfig::default()).await;
        assert!(matches!(
            result,
            Err(Error::Unsupported {
                vid: 0x1d6b,
                pid: 0x0002
            })
        ));
    }

    #[tokio::test]
    async fn missing_node_reports_the_matched_driver() {
        let device = DeviceDescriptor {
            vid: 0x2341,
            pid: 0x0043,
            serial_ports: vec!["/dev/serial-link-test-does-not-exist".into()],
            driver: Some(DriverKind::Cdc),
            ..DeviceDescriptor::named("/sys/bus/usb/devices/1-1")
        };
        let err = match SerialOpener.open(&device, &LinkConfig::default()).await {
            Ok(_) => panic!("opened a nonexistent port"),
            Err(e) => e,
        };
        assert!(err.is_cdc_open_failure(), "unexpected error: {err}");
    }
}
