//! OVS bridge management on top of the OVSDB client
//!
//! Every call returns only after ovsdb-server has acknowledged (or rejected)
//! the transaction.

use async_trait::async_trait;
use don_network::{rtnetlink, OvsdbClient};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DriverError, Result};
use crate::options::BridgeMode;
use crate::retry::Backoff;
use crate::state::NetworkState;

/// Switch operations used by the driver
#[async_trait]
pub trait BridgeManager: Send + Sync {
    /// Seed the local table cache; called once at startup
    async fn init_cache(&self) -> Result<()>;
    /// Create (if missing) and configure the bridge of a network
    async fn init_bridge(&self, network: &NetworkState) -> Result<()>;
    async fn delete_bridge(&self, bridge: &str) -> Result<()>;
    /// Attach a port; a zero `tag` leaves the port untagged
    async fn add_port(&self, bridge: &str, port: &str, tag: u16) -> Result<()>;
    async fn delete_port(&self, bridge: &str, port: &str) -> Result<()>;
}

/// How long to wait for ovs-vswitchd to create a new bridge's kernel interface
const BRIDGE_LINK_WAIT: Duration = Duration::from_secs(5);

/// Address the bridge interface carries in nat mode, once the gateway and
/// its prefix are both known
fn gateway_address(network: &NetworkState) -> Option<(Ipv4Addr, u8)> {
    match network.mode {
        BridgeMode::Nat => Some((network.gateway?, network.gateway_mask?)),
        BridgeMode::Flat => None,
    }
}

/// Bind interface still to be attached in flat mode
fn missing_uplink<'a>(network: &'a NetworkState, ports: &[String]) -> Option<&'a str> {
    if network.mode != BridgeMode::Flat {
        return None;
    }
    let uplink = network.bind_interface.as_deref()?;
    (!ports.iter().any(|p| p == uplink)).then_some(uplink)
}

/// [`BridgeManager`] backed by ovsdb-server
pub struct OvsBridgeManager {
    client: OvsdbClient,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl OvsBridgeManager {
    /// Wrap a client without checking connectivity
    pub fn new(client: OvsdbClient) -> Self {
        Self {
            client,
            monitor: Mutex::new(None),
        }
    }

    /// Wait for ovsdb-server to answer, retrying per `backoff`
    pub async fn connect(client: OvsdbClient, backoff: &Backoff) -> Result<Self> {
        let endpoint = client.endpoint().to_string();
        let dbs = backoff
            .retry(&format!("Connecting to OVSDB at {}", endpoint), || client.list_dbs())
            .await
            .map_err(|e| {
                DriverError::DependencyUnavailable(format!(
                    "could not connect to Open vSwitch at {}: {} ({})",
                    endpoint,
                    e,
                    e.suggestion()
                ))
            })?;
        info!("Connected to OVSDB at {}, databases: {:?}", endpoint, dbs);
        Ok(Self::new(client))
    }

    async fn wait_for_bridge_link(&self, bridge: &str) -> anyhow::Result<()> {
        let backoff = Backoff {
            initial: Duration::from_millis(50),
            max_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_elapsed: BRIDGE_LINK_WAIT,
        };
        backoff
            .retry(&format!("Bringing up bridge {}", bridge), || {
                rtnetlink::link_up(bridge)
            })
            .await
    }

    async fn configure_bridge(&self, network: &NetworkState) -> anyhow::Result<()> {
        let bridge = network.bridge_name.as_str();

        self.client.set_interface_mtu(bridge, network.mtu).await?;
        self.wait_for_bridge_link(bridge).await?;

        match network.mode {
            BridgeMode::Nat => match gateway_address(network) {
                Some((gateway, mask)) => {
                    rtnetlink::ensure_ipv4_address(bridge, gateway, mask).await?;
                    info!("Assigned gateway {}/{} to bridge {}", gateway, mask, bridge);
                }
                None => match network.gateway {
                    Some(gateway) => warn!(
                        "No subnet prefix known for gateway {}; bridge {} left unaddressed",
                        gateway, bridge
                    ),
                    None => debug!("Network on bridge {} has no IPv4 gateway", bridge),
                },
            },
            BridgeMode::Flat => {
                if network.bind_interface.is_some() {
                    let ports = self.client.list_bridge_ports(bridge).await?;
                    match missing_uplink(network, &ports) {
                        Some(uplink) => {
                            self.client.add_port(bridge, uplink, None).await?;
                            info!("Attached bind interface {} to bridge {}", uplink, bridge);
                        }
                        None => debug!("Bind interface already on bridge {}", bridge),
                    }
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BridgeManager for OvsBridgeManager {
    async fn init_cache(&self) -> Result<()> {
        let task = self
            .client
            .start_monitor()
            .await
            .map_err(|e| DriverError::operation("monitor", "OVSDB tables", e))?;
        if let Some(previous) = self.monitor.lock().await.replace(task) {
            previous.abort();
        }

        match self.client.list_bridges().await {
            Ok(bridges) => info!("OVSDB cache seeded; existing bridges: {:?}", bridges),
            Err(e) => warn!("Could not list bridges: {}", e),
        }
        Ok(())
    }

    async fn init_bridge(&self, network: &NetworkState) -> Result<()> {
        let bridge = network.bridge_name.as_str();
        let created = self
            .client
            .create_bridge(bridge)
            .await
            .map_err(|e| DriverError::operation("create bridge", bridge, e))?;

        self.configure_bridge(network)
            .await
            .map_err(|e| DriverError::operation("configure bridge", bridge, e))?;

        if created {
            info!(
                "Initialized bridge {} (mode: {}, mtu: {})",
                bridge, network.mode, network.mtu
            );
        }
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<()> {
        match self.client.delete_bridge(bridge).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!("Bridge {} already absent from OVSDB", bridge);
                Ok(())
            }
            Err(e) => Err(DriverError::operation("delete bridge", bridge, e)),
        }
    }

    async fn add_port(&self, bridge: &str, port: &str, tag: u16) -> Result<()> {
        let tag = (tag != 0).then_some(tag);
        self.client
            .add_port(bridge, port, tag)
            .await
            .map_err(|e| DriverError::operation("attach port", format!("{} to {}", port, bridge), e))
    }

    async fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.client.delete_port(bridge, port).await.map_err(|e| {
            DriverError::operation("detach port", format!("{} from {}", port, bridge), e)
        })
    }
}

impl Drop for OvsBridgeManager {
    fn drop(&mut self) {
        if let Some(task) = self.monitor.get_mut().take() {
            task.abort();
        }
    }
}
