//! USB serial link manager.
//!
//! Finds a supported USB serial device, obtains the host's permission to use
//! it, opens it, and turns the byte stream it produces into delimited
//! [`Record`]s. The [`LinkController`] owns the whole lifecycle; consumers
//! drive and observe it through a [`LinkHandle`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use serial_link::{
//!     AutoGrant, ControllerConfig, DeviceSelector, LinkController, SerialOpener,
//! };
//!
//! # async fn example() -> serial_link::Result<()> {
//! let selector = DeviceSelector::with_driver_table(serial_link::transport::system_source());
//! let controller = LinkController::new(
//!     ControllerConfig::from_env(),
//!     selector,
//!     Arc::new(SerialOpener),
//!     Arc::new(AutoGrant),
//! );
//! let link = controller.handle();
//! let mut records = link.subscribe_records();
//! tokio::spawn(controller.run());
//!
//! link.attach().await?;
//! while let Ok(record) = records.recv().await {
//!     println!("{}", record);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod reassembler;
pub mod record;
pub mod selector;
pub mod supported;
pub mod tracing;
pub mod transport;

pub use config::{ControllerConfig, EmitPolicy, LinkConfig, LinkProfile};
pub use error::{Error, Result};
pub use link::{
    AutoGrant, FailReason, HostEvent, LinkController, LinkEvent, LinkHandle, LinkState,
    PermissionHost, PermissionResponder,
};
pub use reassembler::FrameReassembler;
pub use record::Record;
pub use selector::DeviceSelector;
pub use supported::{DriverKind, DriverTable, SupportPredicate};
pub use transport::{DeviceDescriptor, DeviceSource, PortOpener, SerialOpener};
