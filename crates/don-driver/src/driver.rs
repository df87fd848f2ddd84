//! Network and endpoint lifecycle
//!
//! [`Driver`] owns the registry of networks it created and drives the
//! switch, the kernel and the Docker registry to realize Docker's
//! lifecycle events. Nothing is journaled: a failed step undoes only what
//! the same call created.

use don_network::{OvsdbClient, OvsdbEndpoint};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeManager, OvsBridgeManager};
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::link::{LinkPair, LinkProvisioner, NetlinkProvisioner};
use crate::options::{BridgeOptions, GatewayHint};
use crate::registry::{DisabledRegistry, DockerRegistry, NetworkRegistry};
use crate::state::{NetworkState, NetworkStore};

/// Docker renames the peer to `eth<N>` inside the container
pub const CONTAINER_IFACE_PREFIX: &str = "eth";

/// What Docker needs to finish wiring an endpoint into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinInfo {
    /// Peer veth to move into the container namespace
    pub src_name: String,
    pub dst_prefix: String,
    /// Empty when the network has no IPv4 gateway
    pub gateway: String,
}

pub struct Driver {
    name: String,
    networks: NetworkStore,
    /// Serializes reconstruction of networks missing from `networks`
    recovery: Mutex<()>,
    bridges: Arc<dyn BridgeManager>,
    links: Arc<dyn LinkProvisioner>,
    registry: Arc<dyn NetworkRegistry>,
}

impl Driver {
    pub fn new(
        name: impl Into<String>,
        bridges: Arc<dyn BridgeManager>,
        links: Arc<dyn LinkProvisioner>,
        registry: Arc<dyn NetworkRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            networks: NetworkStore::new(),
            recovery: Mutex::new(()),
            bridges,
            links,
            registry,
        }
    }

    /// Reach OVSDB (with retry) and Docker, then seed the switch cache
    ///
    /// Any failure here is fatal for the process.
    pub async fn connect(config: &DriverConfig) -> Result<Self> {
        let endpoint = match &config.ovsdb.endpoint {
            Some(raw) => raw.parse::<OvsdbEndpoint>().map_err(|e| {
                DriverError::invalid(format!("OVSDB endpoint {}: {}", raw, e))
            })?,
            None => OvsdbEndpoint::detect(),
        };
        let client = OvsdbClient::new(endpoint).with_timeout(config.ovsdb.timeout());
        let bridges = OvsBridgeManager::connect(client, &config.ovsdb.backoff()).await?;
        bridges.init_cache().await?;

        let registry: Arc<dyn NetworkRegistry> = if config.docker.enabled {
            Arc::new(DockerRegistry::connect(&config.docker.socket, &config.name).await?)
        } else {
            warn!("Docker client disabled; networks created before a restart cannot be recovered");
            Arc::new(DisabledRegistry)
        };

        Ok(Self::new(
            config.name.clone(),
            Arc::new(bridges),
            Arc::new(NetlinkProvisioner),
            registry,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered state of a network, without consulting Docker
    pub async fn network(&self, network_id: &str) -> Option<NetworkState> {
        self.networks.get(network_id).await
    }

    pub async fn networks(&self) -> Vec<(String, NetworkState)> {
        self.networks.snapshot().await
    }

    pub async fn create_network(
        &self,
        network_id: &str,
        options: &BridgeOptions,
        gateway: GatewayHint,
    ) -> Result<NetworkState> {
        debug!("CreateNetwork {} ({:?}, {:?})", network_id, options, gateway);
        let state = self.setup_network_state(network_id, options, gateway).await?;
        info!(
            "Created network {} on bridge {} (mode: {}, mtu: {}, gateway: {})",
            network_id,
            state.bridge_name,
            state.mode,
            state.mtu,
            state.gateway_string()
        );
        Ok(state)
    }

    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        debug!("DeleteNetwork {}", network_id);
        let state = self
            .networks
            .get(network_id)
            .await
            .ok_or_else(|| DriverError::not_found(format!("network {}", network_id)))?;

        if let Err(e) = self.bridges.delete_bridge(&state.bridge_name).await {
            error!("Deleting network {}: {}", network_id, e);
            return Err(e);
        }

        self.networks.remove(network_id).await;
        info!("Deleted network {} (bridge {})", network_id, state.bridge_name);
        Ok(())
    }

    pub async fn join(&self, network_id: &str, endpoint_id: &str) -> Result<JoinInfo> {
        debug!("Join endpoint {} to network {}", endpoint_id, network_id);

        // Resolve first so an unknown or foreign network touches nothing
        let state = self.find_network_state(network_id).await?;
        let pair = LinkPair::for_endpoint(endpoint_id);

        self.links.create_pair(&pair).await?;
        if let Err(e) = self.attach(&state, &pair).await {
            if let Err(cleanup) = self.links.delete_pair(&pair).await {
                warn!("Rolling back veth pair {}: {}", pair.local, cleanup);
            }
            error!("Join endpoint {} to network {}: {}", endpoint_id, network_id, e);
            return Err(e);
        }

        info!(
            "Joined endpoint {} to bridge {} via {}",
            endpoint_id, state.bridge_name, pair.local
        );
        Ok(JoinInfo {
            src_name: pair.peer,
            dst_prefix: CONTAINER_IFACE_PREFIX.to_string(),
            gateway: state.gateway_string(),
        })
    }

    async fn attach(&self, state: &NetworkState, pair: &LinkPair) -> Result<()> {
        self.links.bring_up(&pair.local).await?;
        self.bridges.add_port(&state.bridge_name, &pair.local, 0).await
    }

    pub async fn leave(&self, network_id: &str, endpoint_id: &str) -> Result<()> {
        debug!("Leave endpoint {} from network {}", endpoint_id, network_id);
        let pair = LinkPair::for_endpoint(endpoint_id);

        if let Err(e) = self.links.delete_pair(&pair).await {
            warn!("Endpoint {}: {}", endpoint_id, e);
        }

        let bridge = self.bridge_of(network_id).await?;
        self.bridges
            .delete_port(&bridge, &pair.local)
            .await
            .map_err(|e| {
                error!("Leave endpoint {} from network {}: {}", endpoint_id, network_id, e);
                e
            })?;

        info!("Detached endpoint {} from bridge {}", endpoint_id, bridge);
        Ok(())
    }

    /// Bridge of a network, read from Docker's record when the network is
    /// not registered; nothing is registered or created
    async fn bridge_of(&self, network_id: &str) -> Result<String> {
        if let Some(state) = self.networks.get(network_id).await {
            return Ok(state.bridge_name);
        }
        let record = self.registry.lookup_network(network_id).await?;
        let options = BridgeOptions::from_map(&record.options)?;
        Ok(NetworkState::resolve(network_id, &options, record.gateway).bridge_name)
    }

    /// Registered state, or state rebuilt from Docker's record of the network
    async fn find_network_state(&self, network_id: &str) -> Result<NetworkState> {
        if let Some(state) = self.networks.get(network_id).await {
            return Ok(state);
        }

        let _guard = self.recovery.lock().await;
        // Another request may have rebuilt it while we waited
        if let Some(state) = self.networks.get(network_id).await {
            return Ok(state);
        }

        let record = self.registry.lookup_network(network_id).await?;
        let options = BridgeOptions::from_map(&record.options)?;
        let state = self
            .setup_network_state(network_id, &options, record.gateway)
            .await?;
        info!(
            "Recovered network {} (bridge {}) from Docker",
            network_id, state.bridge_name
        );
        Ok(state)
    }

    /// Register a network and bring up its bridge; the registration is undone
    /// if the bridge cannot be initialized
    async fn setup_network_state(
        &self,
        network_id: &str,
        options: &BridgeOptions,
        gateway: GatewayHint,
    ) -> Result<NetworkState> {
        let state = NetworkState::resolve(network_id, options, gateway);

        let registration = self.networks.register(network_id, state.clone()).await?;
        if let Some(previous) = registration.previous() {
            warn!(
                "Network {} was already registered (bridge {}), replacing",
                network_id, previous.bridge_name
            );
        }

        if let Err(e) = self.bridges.init_bridge(&state).await {
            self.networks.rollback(network_id, registration).await;
            error!("Initializing bridge for network {}: {}", network_id, e);
            return Err(e);
        }

        Ok(state)
    }
}
