//! Error types for the serial link.
//!
//! Every variant maps onto one of the conditions a consumer can observe on the
//! link. None of them are fatal to the process: discovery and open failures are
//! recoverable by a fresh attach, I/O and decode failures are retried by the
//! reader.

use thiserror::Error;

use crate::supported::DriverKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No supported device found")]
    NoDeviceFound,

    #[error("Permission to access the device was denied")]
    PermissionDenied,

    #[error("No driver matches device {vid:04x}:{pid:04x}")]
    Unsupported { vid: u16, pid: u16 },

    #[error("{driver} driver could not open the device: {reason}")]
    OpenFailed { driver: DriverKind, reason: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Link is not streaming")]
    NotConnected,

    #[error("Dropped {dropped} bytes of non-UTF-8 data")]
    Decode { dropped: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this failure came from a CDC driver that matched the device
    /// but could not drive it.
    pub fn is_cdc_open_failure(&self) -> bool {
        matches!(
            self,
            Error::OpenFailed {
                driver: DriverKind::Cdc,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_names_the_driver() {
        let err = Error::OpenFailed {
            driver: DriverKind::Cdc,
            reason: "resource busy".into(),
        };
        assert_eq!(
            err.to_string(),
            "CDC driver could not open the device: resource busy"
        );
        assert!(err.is_cdc_open_failure());

        let err = Error::OpenFailed {
            driver: DriverKind::Ftdi,
            reason: "resource busy".into(),
        };
        assert!(!err.is_cdc_open_failure());
    }

    #[test]
    fn unsupported_formats_ids_as_hex() {
        let err = Error::Unsupported {
            vid: 0x1d6b,
            pid: 0x0002,
        };
        assert_eq!(err.to_string(), "No driver matches device 1d6b:0002");
    }
}
