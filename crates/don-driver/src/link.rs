//! Veth pairs connecting containers to OVS bridges

use async_trait::async_trait;
use don_network::rtnetlink;

use crate::error::{DriverError, Result};

/// Host-side veth names start with this; it is also the OVS port name
pub const PORT_PREFIX: &str = "ovs-veth0-";
/// Container-side veth names start with this until Docker renames them
pub const PEER_PREFIX: &str = "ethc";

const ID_PREFIX_LEN: usize = 5;

/// Short form of a Docker id used in interface and bridge names
///
/// Linux caps interface names at 15 bytes, so only the first five
/// characters are kept.
pub fn truncate_id(id: &str) -> &str {
    match id.char_indices().nth(ID_PREFIX_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// Names of the two ends of an endpoint's veth pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPair {
    /// Stays on the host and is attached to the bridge
    pub local: String,
    /// Moved into the container namespace
    pub peer: String,
}

impl LinkPair {
    pub fn for_endpoint(endpoint_id: &str) -> Self {
        let suffix = truncate_id(endpoint_id);
        Self {
            local: format!("{}{}", PORT_PREFIX, suffix),
            peer: format!("{}{}", PEER_PREFIX, suffix),
        }
    }
}

/// Kernel link operations used by the driver
#[async_trait]
pub trait LinkProvisioner: Send + Sync {
    async fn create_pair(&self, pair: &LinkPair) -> Result<()>;
    async fn bring_up(&self, name: &str) -> Result<()>;
    async fn delete_pair(&self, pair: &LinkPair) -> Result<()>;
}

/// rtnetlink-backed provisioner
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkProvisioner;

#[async_trait]
impl LinkProvisioner for NetlinkProvisioner {
    async fn create_pair(&self, pair: &LinkPair) -> Result<()> {
        rtnetlink::create_veth_pair(&pair.local, &pair.peer)
            .await
            .map_err(|e| DriverError::operation("create veth pair", &pair.local, e))
    }

    async fn bring_up(&self, name: &str) -> Result<()> {
        rtnetlink::link_up(name)
            .await
            .map_err(|e| DriverError::operation("enable link", name, e))
    }

    async fn delete_pair(&self, pair: &LinkPair) -> Result<()> {
        rtnetlink::delete_link(&pair.local)
            .await
            .map_err(|e| DriverError::operation("delete veth pair", &pair.local, e))
    }
}
