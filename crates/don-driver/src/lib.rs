//! don-driver: Docker remote network driver backed by Open vSwitch
//!
//! - [`driver::Driver`] handles the network and endpoint lifecycle
//! - [`bridge`], [`link`] and [`registry`] are its three collaborators
//!   (OVSDB, the kernel, Docker's own registry), each behind a trait
//! - [`plugin`] and [`server`] expose the driver on Docker's plugin socket

pub mod api;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod options;
pub mod plugin;
pub mod registry;
pub mod retry;
pub mod server;
pub mod state;

pub use config::DriverConfig;
pub use driver::{Driver, JoinInfo};
pub use error::{DriverError, Result};
pub use options::{BridgeMode, BridgeOptions, GatewayHint};
pub use state::{NetworkState, NetworkStore};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::bridge::BridgeManager;
    pub use super::driver::{Driver, JoinInfo};
    pub use super::error::{DriverError, Result};
    pub use super::link::{LinkPair, LinkProvisioner};
    pub use super::options::{BridgeOptions, GatewayHint};
    pub use super::registry::{NetworkRecord, NetworkRegistry};
}
