//! don-network: native OVS and kernel plumbing for the Docker OVS driver
//!
//! This crate provides:
//! - OVSDB JSON-RPC client for OVS bridge and port management
//! - A table cache kept current through an OVSDB `monitor` subscription
//! - rtnetlink helpers for veth pairs, link state and addresses

pub mod cache;
pub mod codec;
pub mod ovs_error;
pub mod ovsdb;
pub mod rtnetlink;

pub use cache::TableCache;
pub use ovs_error::OvsError;
pub use ovsdb::{OvsdbClient, OvsdbEndpoint};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::cache::TableCache;
    pub use super::ovs_error::OvsError;
    pub use super::ovsdb::{OvsdbClient, OvsdbEndpoint};
}
