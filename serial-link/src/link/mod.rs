//! Link lifecycle.
//!
//! The [`LinkController`] owns the link: it runs device selection, waits for
//! the host's permission answer, opens the port, and drives the read and
//! write tasks while a session is streaming. Everything outside the
//! controller talks to it through a [`LinkHandle`].

mod controller;
mod event;
mod reader;
mod state;
mod writer;

pub use controller::{AutoGrant, LinkController, LinkHandle, PermissionHost, PermissionResponder};
pub use event::{HostEvent, LinkEvent};
pub use state::{FailReason, LinkState};
