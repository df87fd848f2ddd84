//! Docker remote network driver protocol messages
//!
//! Field names follow Docker's Go structs (`NetworkID`, `IPv4Data`, ...).
//! Request fields Docker may omit default to empty values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::driver::JoinInfo;

/// Content type of every plugin response
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpamData {
    #[serde(rename = "AddressSpace", default)]
    pub address_space: String,
    #[serde(rename = "Pool", default)]
    pub pool: String,
    /// CIDR form, e.g. `10.0.0.1/24`
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    #[serde(rename = "AuxAddresses", default)]
    pub aux_addresses: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamData>>,
    #[serde(rename = "IPv6Data", default)]
    pub ipv6_data: Option<Vec<IpamData>>,
}

impl CreateNetworkRequest {
    /// First IPv4 pool; further pools are not supported
    pub fn ipv4(&self) -> Option<&IpamData> {
        self.ipv4_data.as_ref().and_then(|data| data.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointInterface {
    #[serde(rename = "Address", default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    #[serde(rename = "MacAddress", default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Interface", default)]
    pub interface: Option<EndpointInterface>,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

/// Docker keeps the interface it allocated when this is empty
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateEndpointResponse {
    #[serde(rename = "Interface", skip_serializing_if = "Option::is_none")]
    pub interface: Option<EndpointInterface>,
}

/// Requests naming only a network and an endpoint (DeleteEndpoint,
/// EndpointOperInfo, Leave, RevokeExternalConnectivity)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InfoResponse {
    #[serde(rename = "Value")]
    pub value: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceName {
    #[serde(rename = "SrcName")]
    pub src_name: String,
    #[serde(rename = "DstPrefix")]
    pub dst_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinResponse {
    #[serde(rename = "InterfaceName")]
    pub interface_name: InterfaceName,
    #[serde(rename = "Gateway")]
    pub gateway: String,
}

impl From<JoinInfo> for JoinResponse {
    fn from(info: JoinInfo) -> Self {
        Self {
            interface_name: InterfaceName {
                src_name: info.src_name,
                dst_prefix: info.dst_prefix,
            },
            gateway: info.gateway,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgramExternalConnectivityRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryNotification {
    #[serde(rename = "DiscoveryType", default)]
    pub discovery_type: i64,
    #[serde(rename = "DiscoveryData", default)]
    pub discovery_data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default)]
    pub options: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocateNetworkResponse {
    #[serde(rename = "Options", skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec!["NetworkDriver".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesResponse {
    #[serde(rename = "Scope")]
    pub scope: String,
    #[serde(rename = "ConnectivityScope")]
    pub connectivity_scope: String,
}

impl CapabilitiesResponse {
    pub fn local() -> Self {
        Self {
            scope: "local".to_string(),
            connectivity_scope: "local".to_string(),
        }
    }
}

/// Acknowledgement with no payload (`{}`)
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EmptyResponse {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}
