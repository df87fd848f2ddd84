//! Network options as passed by `docker network create -o ...`
//!
//! Docker delivers driver options under the `com.docker.network.generic` key
//! of the create request, and as a flat string map when a network is
//! inspected later. Both shapes are parsed once into [`BridgeOptions`].

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{DriverError, Result};

/// Top-level key Docker nests driver options under
pub const GENERIC_OPTIONS_KEY: &str = "com.docker.network.generic";

/// Namespace of every option this driver understands
pub const OPTION_NAMESPACE: &str = "net.gopher.ovs.";

pub const MTU_OPTION: &str = "net.gopher.ovs.bridge.mtu";
pub const MODE_OPTION: &str = "net.gopher.ovs.bridge.mode";
pub const BRIDGE_NAME_OPTION: &str = "net.gopher.ovs.bridge.name";
pub const BIND_INTERFACE_OPTION: &str = "net.gopher.ovs.bridge.bind_interface";

pub const DEFAULT_MTU: u32 = 1500;

/// How containers on the bridge reach the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Gateway address lives on the bridge's internal interface
    #[default]
    Nat,
    /// Bridge is attached to a physical uplink (the bind interface)
    Flat,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Nat => "nat",
            BridgeMode::Flat => "flat",
        }
    }
}

impl FromStr for BridgeMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nat" => Ok(BridgeMode::Nat),
            "flat" => Ok(BridgeMode::Flat),
            other => Err(DriverError::invalid(format!("{} is not a valid mode", other))),
        }
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated driver options of one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Explicit bridge name; derived from the network id when unset
    pub bridge_name: Option<String>,
    pub mtu: u32,
    pub mode: BridgeMode,
    pub bind_interface: Option<String>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            bridge_name: None,
            mtu: DEFAULT_MTU,
            mode: BridgeMode::default(),
            bind_interface: None,
        }
    }
}

impl BridgeOptions {
    /// Parse the flat option map stored with a Docker network
    ///
    /// Keys outside the driver namespace belong to Docker or other drivers
    /// and are skipped. Unknown keys inside it are rejected.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut parsed = BridgeOptions::default();

        for (key, value) in options {
            match key.as_str() {
                MTU_OPTION => parsed.mtu = parse_mtu(value),
                MODE_OPTION => {
                    if !value.is_empty() {
                        parsed.mode = value.parse()?;
                    }
                }
                BRIDGE_NAME_OPTION => parsed.bridge_name = non_empty(value),
                BIND_INTERFACE_OPTION => parsed.bind_interface = non_empty(value),
                other if other.starts_with(OPTION_NAMESPACE) => {
                    return Err(DriverError::invalid(format!("unknown option {}", other)));
                }
                other => debug!("Ignoring foreign network option {}", other),
            }
        }

        Ok(parsed)
    }

    /// Parse the `Options` object of a CreateNetwork request
    pub fn from_request(options: Option<&HashMap<String, Value>>) -> Result<Self> {
        let Some(generic) = options.and_then(|o| o.get(GENERIC_OPTIONS_KEY)) else {
            return Ok(BridgeOptions::default());
        };

        let generic = match generic {
            Value::Null => return Ok(BridgeOptions::default()),
            Value::Object(map) => map,
            other => {
                return Err(DriverError::invalid(format!(
                    "{} must be an object, got {}",
                    GENERIC_OPTIONS_KEY, other
                )))
            }
        };

        let mut flat = HashMap::with_capacity(generic.len());
        for (key, value) in generic {
            match value {
                Value::String(s) => {
                    flat.insert(key.clone(), s.clone());
                }
                other if key.starts_with(OPTION_NAMESPACE) => {
                    return Err(DriverError::invalid(format!(
                        "option {} must be a string, got {}",
                        key, other
                    )));
                }
                _ => debug!("Ignoring non-string foreign option {}", key),
            }
        }

        Self::from_map(&flat)
    }
}

/// Invalid MTU values fall back to the default rather than failing the network
fn parse_mtu(value: &str) -> u32 {
    match value.trim().parse::<u32>() {
        Ok(mtu) if mtu > 0 => mtu,
        _ => {
            warn!("Invalid MTU '{}', using default {}", value, DEFAULT_MTU);
            DEFAULT_MTU
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// IPv4 gateway of a network as allocated by IPAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayHint {
    pub address: Option<Ipv4Addr>,
    pub prefix_len: Option<u8>,
}

impl GatewayHint {
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from an IPAM gateway (`10.0.0.1/24` or `10.0.0.1`) and the pool
    /// it was allocated from (`10.0.0.0/24`), either of which may be empty
    ///
    /// The prefix carried by the gateway wins over the pool's.
    pub fn from_ipam(gateway: &str, pool: &str) -> Result<Self> {
        let gateway = gateway.trim();
        let pool_prefix = match pool.trim() {
            "" => None,
            pool => Some(
                pool.parse::<Ipv4Net>()
                    .map_err(|e| DriverError::invalid(format!("invalid pool {}: {}", pool, e)))?
                    .prefix_len(),
            ),
        };

        if gateway.is_empty() {
            return Ok(Self {
                address: None,
                prefix_len: pool_prefix,
            });
        }

        if gateway.contains('/') {
            let net = gateway
                .parse::<Ipv4Net>()
                .map_err(|e| DriverError::invalid(format!("invalid gateway {}: {}", gateway, e)))?;
            return Ok(Self {
                address: Some(net.addr()),
                prefix_len: Some(net.prefix_len()),
            });
        }

        let address = gateway
            .parse::<Ipv4Addr>()
            .map_err(|e| DriverError::invalid(format!("invalid gateway {}: {}", gateway, e)))?;
        Ok(Self {
            address: Some(address),
            prefix_len: pool_prefix,
        })
    }
}
