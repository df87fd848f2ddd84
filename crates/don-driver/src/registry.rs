//! Docker's own network registry, used to rebuild state the driver lost
//!
//! After a restart the driver no longer knows the networks Docker created
//! through it. Their options and gateway are read back from the Docker
//! Engine API (`GET /networks/{id}`) over the daemon's unix socket.

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::UnixConnector;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DriverError, Result};
use crate::options::GatewayHint;

/// What Docker remembers about a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub options: HashMap<String, String>,
    pub gateway: GatewayHint,
}

/// Source of truth for networks missing from the local registry
#[async_trait]
pub trait NetworkRegistry: Send + Sync {
    async fn lookup_network(&self, network_id: &str) -> Result<NetworkRecord>;
}

/// Registry used when the Docker client is switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRegistry;

#[async_trait]
impl NetworkRegistry for DisabledRegistry {
    async fn lookup_network(&self, network_id: &str) -> Result<NetworkRecord> {
        Err(DriverError::not_found(format!(
            "network {}: Docker client disabled; unable to get network state",
            network_id
        )))
    }
}

/// `GET /networks/{id}` response, reduced to the fields we read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkResource {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    pub driver: String,
    #[serde(default)]
    pub options: Option<HashMap<String, String>>,
    #[serde(rename = "IPAM", default)]
    pub ipam: Option<Ipam>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ipam {
    #[serde(default)]
    pub config: Option<Vec<IpamConfig>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamConfig {
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub gateway: String,
}

impl NetworkResource {
    /// Convert to a record, refusing networks owned by another driver
    pub fn into_record(self, driver_name: &str) -> Result<NetworkRecord> {
        if self.driver != driver_name {
            return Err(DriverError::not_found(format!(
                "network {} ({}) belongs to driver '{}', not '{}'",
                self.id, self.name, self.driver, driver_name
            )));
        }

        // First pool with an IPv4 gateway; dual stack is not handled
        let gateway = self
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .find_map(|cfg| {
                let address = cfg.gateway.parse::<Ipv4Addr>().ok()?;
                Some(
                    GatewayHint::from_ipam(&cfg.gateway, &cfg.subnet).unwrap_or(GatewayHint {
                        address: Some(address),
                        prefix_len: None,
                    }),
                )
            })
            .unwrap_or_default();

        Ok(NetworkRecord {
            options: self.options.unwrap_or_default(),
            gateway,
        })
    }
}

/// Docker Engine API client over a unix socket
pub struct DockerRegistry {
    socket: PathBuf,
    driver_name: String,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl DockerRegistry {
    /// Connect and ping the daemon; startup fails if it does not answer
    pub async fn connect(socket: impl AsRef<Path>, driver_name: impl Into<String>) -> Result<Self> {
        let registry = Self {
            socket: socket.as_ref().to_path_buf(),
            driver_name: driver_name.into(),
            client: Client::builder(TokioExecutor::new()).build(UnixConnector),
        };

        let (status, _) = registry.get("/_ping").await.map_err(|e| {
            DriverError::DependencyUnavailable(format!(
                "could not connect to docker at {}: {:#}",
                registry.socket.display(),
                e
            ))
        })?;
        if !status.is_success() {
            return Err(DriverError::DependencyUnavailable(format!(
                "docker at {} answered ping with {}",
                registry.socket.display(),
                status
            )));
        }

        info!("Connected to Docker at {}", registry.socket.display());
        Ok(registry)
    }

    async fn get(&self, path: &str) -> anyhow::Result<(StatusCode, Bytes)> {
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket, path).into();
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        let body = resp.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl NetworkRegistry for DockerRegistry {
    async fn lookup_network(&self, network_id: &str) -> Result<NetworkRecord> {
        let (status, body) = self
            .get(&format!("/networks/{}", network_id))
            .await
            .map_err(|e| DriverError::operation("inspect network", network_id, e))?;

        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(DriverError::not_found(format!(
                    "network {} unknown to docker",
                    network_id
                )))
            }
            other => {
                return Err(DriverError::operation(
                    "inspect network",
                    network_id,
                    anyhow::anyhow!(
                        "docker returned {}: {}",
                        other,
                        String::from_utf8_lossy(&body).trim()
                    ),
                ))
            }
        }

        let resource: NetworkResource = serde_json::from_slice(&body)
            .map_err(|e| DriverError::operation("decode network", network_id, e))?;
        debug!("Docker network {}: {:?}", network_id, resource);
        resource.into_record(&self.driver_name)
    }
}
