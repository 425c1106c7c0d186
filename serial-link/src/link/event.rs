use std::{fmt, io};

/// Notifications raised by the link for its consumers.
///
/// These are one-shot events, not state: a subscriber that lags far enough
/// behind misses old ones. Use [`super::LinkHandle::state`] for the current
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Port open and configured; records will follow.
    Ready,
    /// The streaming session ended.
    Disconnected,
    /// No driver claims the selected device.
    Unsupported,
    /// Discovery found no supported device.
    NoDevice,
    PermissionGranted,
    /// Denied by the host, or the request timed out.
    PermissionDenied,
    /// The generic CDC driver claimed the device but could not open it.
    DriverIncompatible,
    /// A vendor driver claimed the device but could not open it.
    DeviceNotWorking,
    /// A chunk of non-UTF-8 data was discarded.
    DecodeError { dropped: usize },
    /// A read failed and will be retried.
    IoError { kind: io::ErrorKind },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Ready => write!(f, "ready"),
            LinkEvent::Disconnected => write!(f, "disconnected"),
            LinkEvent::Unsupported => write!(f, "device not supported"),
            LinkEvent::NoDevice => write!(f, "no device"),
            LinkEvent::PermissionGranted => write!(f, "permission granted"),
            LinkEvent::PermissionDenied => write!(f, "permission denied"),
            LinkEvent::DriverIncompatible => write!(f, "CDC driver not working"),
            LinkEvent::DeviceNotWorking => write!(f, "device not working"),
            LinkEvent::DecodeError { dropped } => write!(f, "dropped {} undecodable bytes", dropped),
            LinkEvent::IoError { kind } => write!(f, "I/O error ({}), retrying", kind),
        }
    }
}

/// Notifications pushed into the link by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A device appeared. `name` is informational; discovery runs regardless.
    DeviceAttached { name: Option<String> },
    /// A device went away. `None` means "whatever device the link is using".
    DeviceDetached { name: Option<String> },
    /// The host's answer to the outstanding permission request.
    PermissionResponse { granted: bool },
    /// Application-defined trigger to run discovery and ask for permission.
    PermissionRequested,
}
