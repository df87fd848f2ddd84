//! Direct OVSDB JSON-RPC client - no wrappers, pure native protocol
//! Talks to ovsdb-server over its unix socket (or a TCP manager port)
//!
//! Request/response calls open a short-lived connection each. The table
//! cache is fed by one long-lived `monitor` connection spawned by
//! [`OvsdbClient::start_monitor`].

use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::task::JoinHandle;

use crate::cache::{uuid_set, TableCache};
use crate::codec::JsonReader;
use crate::ovs_error::OvsError;

pub type Result<T> = std::result::Result<T, OvsError>;

/// Name of the database every operation runs against
pub const DATABASE: &str = "Open_vSwitch";

const DEFAULT_SOCKETS: [&str; 2] = ["/var/run/openvswitch/db.sock", "/run/openvswitch/db.sock"];

/// Where ovsdb-server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OvsdbEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl OvsdbEndpoint {
    /// First default unix socket that exists on this host
    pub fn detect() -> Self {
        let path = DEFAULT_SOCKETS
            .iter()
            .find(|p| Path::new(p).exists())
            .unwrap_or(&DEFAULT_SOCKETS[0]);
        OvsdbEndpoint::Unix(PathBuf::from(path))
    }
}

impl Default for OvsdbEndpoint {
    fn default() -> Self {
        Self::detect()
    }
}

impl FromStr for OvsdbEndpoint {
    type Err = OvsError;

    /// Accepts `unix:/path`, `tcp:host:port` or a bare socket path
    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(OvsError::InvalidEndpoint(s.to_string()));
            }
            return Ok(OvsdbEndpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            match addr.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    return Ok(OvsdbEndpoint::Tcp(addr.to_string()))
                }
                _ => return Err(OvsError::InvalidEndpoint(s.to_string())),
            }
        }
        if s.starts_with('/') {
            return Ok(OvsdbEndpoint::Unix(PathBuf::from(s)));
        }
        Err(OvsError::InvalidEndpoint(s.to_string()))
    }
}

impl fmt::Display for OvsdbEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OvsdbEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            OvsdbEndpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Direct OVSDB JSON-RPC client
#[derive(Clone)]
pub struct OvsdbClient {
    endpoint: OvsdbEndpoint,
    timeout: Duration,
    cache: Arc<TableCache>,
    next_id: Arc<AtomicU64>,
}

impl OvsdbClient {
    /// Create a client for the given endpoint
    pub fn new(endpoint: OvsdbEndpoint) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
            cache: Arc::new(TableCache::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Set timeout for RPC calls
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &OvsdbEndpoint {
        &self.endpoint
    }

    /// The table mirror fed by [`Self::start_monitor`]
    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    async fn connect(&self) -> Result<Box<dyn Transport>> {
        log::debug!("Connecting to OVSDB at {}", self.endpoint);
        match &self.endpoint {
            OvsdbEndpoint::Unix(path) => {
                if !path.exists() {
                    return Err(OvsError::OvsdbSocketNotFound(path.display().to_string()));
                }
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|source| OvsError::OvsdbConnection {
                        endpoint: self.endpoint.to_string(),
                        source,
                    })?;
                Ok(Box::new(stream))
            }
            OvsdbEndpoint::Tcp(addr) => {
                let stream =
                    TcpStream::connect(addr)
                        .await
                        .map_err(|source| OvsError::OvsdbConnection {
                            endpoint: self.endpoint.to_string(),
                            source,
                        })?;
                Ok(Box::new(stream))
            }
        }
    }

    fn request(&self, method: &str, params: Value) -> (u64, Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "method": method,
            "params": params,
            "id": id
        });
        (id, request)
    }

    /// Send JSON-RPC request and get response
    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let mut stream = self.connect().await?;
        let (id, request) = self.request(method, params);

        let request_str = serde_json::to_string(&request)?;
        log::debug!("Sending OVSDB request: {}", request_str);
        stream.write_all(request_str.as_bytes()).await?;
        stream.flush().await?;

        let mut reader = JsonReader::new(stream);
        let response = tokio::time::timeout(self.timeout, wait_for_reply(&mut reader, id))
            .await
            .map_err(|_| OvsError::Timeout(method.to_string()))??;
        log::debug!("OVSDB response: {}", response);

        rpc_result(response)
    }

    /// List all databases
    pub async fn list_dbs(&self) -> Result<Vec<String>> {
        let result = self.rpc_call("list_dbs", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Transact - execute OVSDB operations
    ///
    /// Fails if any operation (or the commit itself) reports an error.
    pub async fn transact(&self, operations: Value) -> Result<Value> {
        let mut params = vec![json!(DATABASE)];
        if let Some(ops_array) = operations.as_array() {
            params.extend(ops_array.iter().cloned());
        }
        let result = self.rpc_call("transact", json!(params)).await?;
        check_transaction(&result)?;
        Ok(result)
    }

    /// Subscribe to Bridge/Port/Interface changes and keep the cache current
    ///
    /// Returns once the initial snapshot is in the cache. The returned task
    /// applies `update` notifications until the connection drops, at which
    /// point the cache is invalidated.
    pub async fn start_monitor(&self) -> Result<JoinHandle<()>> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = JsonReader::new(read_half);

        let (id, request) = self.request(
            "monitor",
            json!([
                DATABASE,
                null,
                {
                    "Bridge": {"columns": ["name", "ports", "datapath_type"]},
                    "Port": {"columns": ["name", "interfaces", "tag"]},
                    "Interface": {"columns": ["name", "type", "mtu_request"]}
                }
            ]),
        );
        write_half
            .write_all(serde_json::to_string(&request)?.as_bytes())
            .await?;
        write_half.flush().await?;

        let reply = tokio::time::timeout(self.timeout, wait_for_reply(&mut reader, id))
            .await
            .map_err(|_| OvsError::Timeout("monitor".to_string()))??;
        let initial = rpc_result(reply)?;
        self.cache.seed(&initial).await;
        log::info!("OVSDB table cache seeded from {}", self.endpoint);

        let cache = Arc::clone(&self.cache);
        Ok(tokio::spawn(async move {
            loop {
                match reader.next_message().await {
                    Ok(Some(msg)) => match msg.get("method").and_then(Value::as_str) {
                        Some("update") => {
                            if let Some(updates) = msg["params"].get(1) {
                                cache.apply_update(updates).await;
                            }
                        }
                        Some("echo") => {
                            let reply = json!({
                                "result": msg["params"],
                                "error": null,
                                "id": msg["id"]
                            });
                            if let Err(e) = write_half.write_all(reply.to_string().as_bytes()).await {
                                log::warn!("Failed to answer OVSDB echo: {}", e);
                                break;
                            }
                        }
                        _ => log::debug!("Ignoring OVSDB message: {}", msg),
                    },
                    Ok(None) => {
                        log::warn!("OVSDB monitor connection closed");
                        break;
                    }
                    Err(e) => {
                        log::warn!("OVSDB monitor connection failed: {}", e);
                        break;
                    }
                }
            }
            cache.invalidate().await;
        }))
    }

    /// Create OVS bridge together with its internal port and interface
    ///
    /// Returns `false` if a bridge with that name already existed.
    pub async fn create_bridge(&self, bridge_name: &str) -> Result<bool> {
        if self.bridge_exists(bridge_name).await? {
            log::info!("Bridge {} already exists, skipping creation", bridge_name);
            return Ok(false);
        }

        // uuid-name is a transaction-local identifier, not a real UUID
        let token = named_uuid_token(bridge_name);
        let bridge_ref = format!("bridge{}", token);
        let port_ref = format!("port{}", token);
        let iface_ref = format!("iface{}", token);

        let operations = json!([
            {
                "op": "insert",
                "table": "Bridge",
                "uuid-name": bridge_ref,
                "row": {
                    "name": bridge_name,
                    "datapath_type": "system",
                    "stp_enable": false,
                    "ports": ["set", [["named-uuid", port_ref]]],
                    "other_config": ["map", []],
                    "external_ids": ["map", []]
                }
            },
            {
                "op": "insert",
                "table": "Port",
                "uuid-name": port_ref,
                "row": {
                    "name": bridge_name,
                    "interfaces": ["set", [["named-uuid", iface_ref]]]
                }
            },
            {
                "op": "insert",
                "table": "Interface",
                "uuid-name": iface_ref,
                "row": {
                    "name": bridge_name,
                    "type": "internal"
                }
            },
            {
                "op": "mutate",
                "table": "Open_vSwitch",
                "where": [],
                "mutations": [
                    ["bridges", "insert", ["set", [["named-uuid", bridge_ref]]]]
                ]
            }
        ]);

        self.transact(operations).await?;
        log::info!("Created OVS bridge: {}", bridge_name);
        Ok(true)
    }

    /// Delete bridge
    pub async fn delete_bridge(&self, bridge_name: &str) -> Result<()> {
        let bridge_uuid = self.find_bridge_uuid(bridge_name).await?;

        let operations = json!([
            {
                "op": "mutate",
                "table": "Open_vSwitch",
                "where": [],
                "mutations": [
                    ["bridges", "delete", ["uuid", &bridge_uuid]]
                ]
            },
            {
                "op": "delete",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", &bridge_uuid]]]
            }
        ]);

        self.transact(operations).await?;
        log::info!("Deleted OVS bridge: {}", bridge_name);
        Ok(())
    }

    /// Add port to bridge (attaches an existing kernel interface)
    ///
    /// A `tag` makes the port an access port on that VLAN.
    pub async fn add_port(&self, bridge_name: &str, port_name: &str, tag: Option<u16>) -> Result<()> {
        let bridge_uuid = self.find_bridge_uuid(bridge_name).await?;

        let token = named_uuid_token(port_name);
        let port_ref = format!("port{}", token);
        let iface_ref = format!("iface{}", token);

        let mut port_row = json!({
            "name": port_name,
            "interfaces": ["set", [["named-uuid", iface_ref]]]
        });
        if let Some(tag) = tag {
            port_row["tag"] = json!(tag);
        }

        let operations = json!([
            {
                "op": "insert",
                "table": "Port",
                "row": port_row,
                "uuid-name": port_ref
            },
            {
                "op": "insert",
                "table": "Interface",
                "row": {
                    "name": port_name
                },
                "uuid-name": iface_ref
            },
            {
                "op": "mutate",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", &bridge_uuid]]],
                "mutations": [
                    ["ports", "insert", ["set", [["named-uuid", port_ref]]]]
                ]
            }
        ]);

        self.transact(operations).await?;
        log::info!("Port {} (tag: {:?}) added to bridge {}", port_name, tag, bridge_name);
        Ok(())
    }

    /// Delete a port from a bridge
    ///
    /// Port and Interface rows are not root rows; ovsdb-server garbage
    /// collects them once the bridge stops referencing the port.
    pub async fn delete_port(&self, bridge_name: &str, port_name: &str) -> Result<()> {
        let port_uuid = self
            .find_uuid("Port", port_name)
            .await?
            .ok_or_else(|| OvsError::PortNotFound(port_name.to_string()))?;
        let bridge_uuid = self.find_bridge_uuid(bridge_name).await?;

        let operations = json!([
            {
                "op": "mutate",
                "table": "Bridge",
                "where": [["_uuid", "==", ["uuid", bridge_uuid]]],
                "mutations": [["ports", "delete", ["uuid", port_uuid]]]
            }
        ]);

        self.transact(operations).await?;
        log::info!("Port {} removed from bridge {}", port_name, bridge_name);
        Ok(())
    }

    /// Request an MTU for an interface (`mtu_request` column)
    pub async fn set_interface_mtu(&self, interface_name: &str, mtu: u32) -> Result<()> {
        let operations = json!([
            {
                "op": "update",
                "table": "Interface",
                "where": [["name", "==", interface_name]],
                "row": {
                    "mtu_request": mtu
                }
            }
        ]);

        self.transact(operations).await?;
        Ok(())
    }

    /// Check if bridge exists
    pub async fn bridge_exists(&self, bridge_name: &str) -> Result<bool> {
        Ok(self.find_uuid("Bridge", bridge_name).await?.is_some())
    }

    /// Find bridge UUID by name
    async fn find_bridge_uuid(&self, bridge_name: &str) -> Result<String> {
        self.find_uuid("Bridge", bridge_name)
            .await?
            .ok_or_else(|| OvsError::BridgeNotFound(bridge_name.to_string()))
    }

    /// Find a row UUID by its `name` column, always asking the server
    async fn find_uuid(&self, table: &str, name: &str) -> Result<Option<String>> {
        let operations = json!([{
            "op": "select",
            "table": table,
            "where": [["name", "==", name]],
            "columns": ["_uuid"]
        }]);

        let result = self.transact(operations).await?;
        Ok(result[0]["rows"]
            .as_array()
            .and_then(|rows| rows.first())
            .map(|row| uuid_set(&row["_uuid"]))
            .and_then(|uuids| uuids.into_iter().next()))
    }

    /// List all bridges (served from the cache while the monitor runs)
    pub async fn list_bridges(&self) -> Result<Vec<String>> {
        if self.cache.is_seeded() {
            return Ok(self.cache.names("Bridge").await);
        }

        let operations = json!([{
            "op": "select",
            "table": "Bridge",
            "where": [],
            "columns": ["name"]
        }]);

        let result = self.transact(operations).await?;
        let mut bridges: Vec<String> = result[0]["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row["name"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        bridges.sort();
        Ok(bridges)
    }

    /// List ports on bridge
    ///
    /// Served from the cache while the monitor runs. A bridge the cache has
    /// not seen yet (its insert notification may still be in flight) is
    /// looked up on the server.
    pub async fn list_bridge_ports(&self, bridge_name: &str) -> Result<Vec<String>> {
        if self.cache.is_seeded() {
            if let Some(ports) = self.cache.bridge_ports(bridge_name).await {
                return Ok(ports);
            }
            log::debug!("Bridge {} not cached yet, asking ovsdb-server", bridge_name);
        }

        let operations = json!([{
            "op": "select",
            "table": "Bridge",
            "where": [["name", "==", bridge_name]],
            "columns": ["ports"]
        }]);
        let result = self.transact(operations).await?;
        let row = result[0]["rows"]
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| OvsError::BridgeNotFound(bridge_name.to_string()))?;

        let mut port_names = Vec::new();
        for port_uuid in uuid_set(&row["ports"]) {
            let operations = json!([{
                "op": "select",
                "table": "Port",
                "where": [["_uuid", "==", ["uuid", &port_uuid]]],
                "columns": ["name"]
            }]);

            let result = self.transact(operations).await?;
            if let Some(name) = result[0]["rows"][0]["name"].as_str() {
                port_names.push(name.to_string());
            }
        }
        port_names.sort();
        Ok(port_names)
    }
}

async fn wait_for_reply<R: AsyncRead + Unpin>(reader: &mut JsonReader<R>, id: u64) -> Result<Value> {
    loop {
        let msg = reader
            .next_message()
            .await?
            .ok_or(OvsError::ConnectionClosed)?;
        if msg.get("id").and_then(Value::as_u64) == Some(id) && msg.get("method").is_none() {
            return Ok(msg);
        }
        log::debug!("Skipping unrelated OVSDB message: {}", msg);
    }
}

fn rpc_result(response: Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        if !error.is_null() {
            return Err(OvsError::Rpc(error.to_string()));
        }
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

fn check_transaction(result: &Value) -> Result<()> {
    let Some(results) = result.as_array() else {
        return Err(OvsError::Protocol(format!(
            "transact result is not an array: {}",
            result
        )));
    };
    for op_result in results {
        if let Some(error) = op_result.get("error") {
            let details = op_result
                .get("details")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(OvsError::Transaction(format!(
                "{} {}",
                error.as_str().unwrap_or("unknown error"),
                details
            )
            .trim_end()
            .to_string()));
        }
    }
    Ok(())
}

/// Identifier-safe token for `uuid-name` (letters and digits only)
fn named_uuid_token(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

impl Default for OvsdbClient {
    fn default() -> Self {
        Self::new(OvsdbEndpoint::default())
    }
}
