use std::fmt;

/// Why the last connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    PermissionDenied,
    /// The host never answered the permission request.
    PermissionTimeout,
    /// No driver claimed the device, or the driver could not open it.
    OpenError,
}

/// Lifecycle of the link. Written only by the controller task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    AwaitingPermission,
    Connecting,
    Streaming,
    Disconnected,
    Failed(FailReason),
}

impl LinkState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, LinkState::Streaming)
    }

    /// A connection is being opened or is open; attach requests are ignored.
    pub fn is_busy(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Streaming)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::AwaitingPermission => write!(f, "awaiting permission"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Streaming => write!(f, "streaming"),
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Failed(FailReason::PermissionDenied) => write!(f, "failed: permission denied"),
            LinkState::Failed(FailReason::PermissionTimeout) => {
                write!(f, "failed: permission request timed out")
            }
            LinkState::Failed(FailReason::OpenError) => write!(f, "failed: could not open device"),
        }
    }
}
