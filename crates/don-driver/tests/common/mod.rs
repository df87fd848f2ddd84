//! Recording fakes of the driver's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use don_driver::bridge::BridgeManager;
use don_driver::link::{LinkPair, LinkProvisioner};
use don_driver::registry::{NetworkRecord, NetworkRegistry};
use don_driver::{Driver, DriverError, GatewayHint, NetworkState, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// One collaborator call, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InitBridge(String),
    DeleteBridge(String),
    AddPort(String, String),
    DeletePort(String, String),
    CreatePair(String, String),
    BringUp(String),
    DeletePair(String),
    Lookup(String),
}

impl Call {
    /// Whether the call changes the kernel or the switch
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::Lookup(_))
    }
}

/// Call log and failure switches shared by all fakes
#[derive(Default)]
pub struct World {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    networks: Mutex<HashMap<String, NetworkRecord>>,
    foreign: Mutex<HashSet<String>>,
}

impl World {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make every call of `op` (e.g. `"init_bridge"`) fail
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    /// Network known to Docker as created through this driver
    pub fn docker_network(&self, id: &str, options: &[(&str, &str)], gateway: GatewayHint) {
        let options = options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.networks
            .lock()
            .unwrap()
            .insert(id.to_string(), NetworkRecord { options, gateway });
    }

    /// Network known to Docker but owned by another driver
    pub fn foreign_network(&self, id: &str) {
        self.foreign.lock().unwrap().insert(id.to_string());
    }

    fn record(&self, op: &'static str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(op) {
            return Err(DriverError::operation(op, "fake", anyhow::anyhow!("injected failure")));
        }
        Ok(())
    }
}

pub struct FakeBridges(pub Arc<World>);
pub struct FakeLinks(pub Arc<World>);
pub struct FakeRegistry(pub Arc<World>);

#[async_trait]
impl BridgeManager for FakeBridges {
    async fn init_cache(&self) -> Result<()> {
        Ok(())
    }

    async fn init_bridge(&self, network: &NetworkState) -> Result<()> {
        self.0
            .record("init_bridge", Call::InitBridge(network.bridge_name.clone()))
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<()> {
        self.0
            .record("delete_bridge", Call::DeleteBridge(bridge.to_string()))
    }

    async fn add_port(&self, bridge: &str, port: &str, _tag: u16) -> Result<()> {
        self.0.record(
            "add_port",
            Call::AddPort(bridge.to_string(), port.to_string()),
        )
    }

    async fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.0.record(
            "delete_port",
            Call::DeletePort(bridge.to_string(), port.to_string()),
        )
    }
}

#[async_trait]
impl LinkProvisioner for FakeLinks {
    async fn create_pair(&self, pair: &LinkPair) -> Result<()> {
        self.0.record(
            "create_pair",
            Call::CreatePair(pair.local.clone(), pair.peer.clone()),
        )
    }

    async fn bring_up(&self, name: &str) -> Result<()> {
        self.0.record("bring_up", Call::BringUp(name.to_string()))
    }

    async fn delete_pair(&self, pair: &LinkPair) -> Result<()> {
        self.0
            .record("delete_pair", Call::DeletePair(pair.local.clone()))
    }
}

#[async_trait]
impl NetworkRegistry for FakeRegistry {
    async fn lookup_network(&self, network_id: &str) -> Result<NetworkRecord> {
        self.0
            .record("lookup", Call::Lookup(network_id.to_string()))?;
        if self.0.foreign.lock().unwrap().contains(network_id) {
            return Err(DriverError::not_found(format!(
                "network {} belongs to another driver",
                network_id
            )));
        }
        self.0
            .networks
            .lock()
            .unwrap()
            .get(network_id)
            .cloned()
            .ok_or_else(|| DriverError::not_found(format!("network {}", network_id)))
    }
}

/// Driver named `ovs` wired to fakes sharing one [`World`]
pub fn driver() -> (Arc<Driver>, Arc<World>) {
    let world = Arc::new(World::default());
    let driver = Driver::new(
        "ovs",
        Arc::new(FakeBridges(world.clone())),
        Arc::new(FakeLinks(world.clone())),
        Arc::new(FakeRegistry(world.clone())),
    );
    (Arc::new(driver), world)
}
