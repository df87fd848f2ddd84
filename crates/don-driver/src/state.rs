//! Per-network state and the registry that owns it

use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::Mutex;

use crate::error::{DriverError, Result};
use crate::link::truncate_id;
use crate::options::{BridgeMode, BridgeOptions, GatewayHint};

/// Derived bridge names start with this
pub const BRIDGE_PREFIX: &str = "ovsbr-";

/// Resolved configuration of one network, filled in at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub bridge_name: String,
    pub mtu: u32,
    pub mode: BridgeMode,
    pub gateway: Option<Ipv4Addr>,
    /// Prefix length of the gateway's subnet
    pub gateway_mask: Option<u8>,
    pub bind_interface: Option<String>,
}

impl NetworkState {
    pub fn resolve(network_id: &str, options: &BridgeOptions, gateway: GatewayHint) -> Self {
        let bridge_name = options
            .bridge_name
            .clone()
            .unwrap_or_else(|| format!("{}{}", BRIDGE_PREFIX, truncate_id(network_id)));

        Self {
            bridge_name,
            mtu: options.mtu,
            mode: options.mode,
            gateway: gateway.address,
            gateway_mask: gateway.prefix_len,
            bind_interface: options.bind_interface.clone(),
        }
    }

    /// Gateway as Docker expects it in a join response (empty when unknown)
    pub fn gateway_string(&self) -> String {
        self.gateway.map(|gw| gw.to_string()).unwrap_or_default()
    }
}

#[derive(Debug)]
struct Entry {
    /// Distinguishes successive registrations of the same id
    generation: u64,
    state: NetworkState,
}

#[derive(Debug, Default)]
struct Networks {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// Receipt for [`NetworkStore::register`], needed to roll it back
#[derive(Debug)]
pub struct Registration {
    generation: u64,
    previous: Option<NetworkState>,
}

impl Registration {
    /// State this registration replaced
    pub fn previous(&self) -> Option<&NetworkState> {
        self.previous.as_ref()
    }
}

/// Thread-safe map of network id to [`NetworkState`]
///
/// Every read and write takes the same lock; nothing outside this type
/// touches the map.
#[derive(Debug, Default)]
pub struct NetworkStore {
    networks: Mutex<Networks>,
}

impl NetworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network, replacing any earlier state of the same id
    ///
    /// Fails if a different network already owns the bridge name.
    pub async fn register(&self, network_id: &str, state: NetworkState) -> Result<Registration> {
        let mut networks = self.networks.lock().await;
        if let Some((owner, _)) = networks.entries.iter().find(|(id, entry)| {
            id.as_str() != network_id && entry.state.bridge_name == state.bridge_name
        }) {
            return Err(DriverError::invalid(format!(
                "bridge {} is already used by network {}",
                state.bridge_name, owner
            )));
        }

        networks.next_generation += 1;
        let generation = networks.next_generation;
        let previous = networks
            .entries
            .insert(network_id.to_string(), Entry { generation, state })
            .map(|entry| entry.state);
        Ok(Registration {
            generation,
            previous,
        })
    }

    /// Undo a registration: put back the state it replaced, unless the id
    /// was registered again in the meantime
    pub async fn rollback(&self, network_id: &str, registration: Registration) {
        let mut networks = self.networks.lock().await;
        let current = networks.entries.get(network_id).map(|e| e.generation);
        if current != Some(registration.generation) {
            return;
        }
        match registration.previous {
            Some(state) => {
                // generation 0 is never handed out, so a stale receipt
                // cannot roll back the restored entry
                networks
                    .entries
                    .insert(network_id.to_string(), Entry { generation: 0, state });
            }
            None => {
                networks.entries.remove(network_id);
            }
        }
    }

    pub async fn get(&self, network_id: &str) -> Option<NetworkState> {
        let networks = self.networks.lock().await;
        networks.entries.get(network_id).map(|e| e.state.clone())
    }

    pub async fn remove(&self, network_id: &str) -> Option<NetworkState> {
        let mut networks = self.networks.lock().await;
        networks.entries.remove(network_id).map(|e| e.state)
    }

    /// Snapshot of every registered network, sorted by id
    pub async fn snapshot(&self) -> Vec<(String, NetworkState)> {
        let networks = self.networks.lock().await;
        let mut all: Vec<_> = networks
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
