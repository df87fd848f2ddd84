//! Docker plugin HTTP API
//!
//! Docker posts JSON without a JSON content type, so bodies are read raw
//! and decoded here. Every failure is answered with HTTP 500 and
//! `{"Err": "<message>"}`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::api::*;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::options::{BridgeOptions, GatewayHint};

/// JSON response with Docker's plugin content type
#[derive(Debug)]
pub struct PluginResponse<T>(pub T);

impl<T: Serialize> IntoResponse for PluginResponse<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
                body,
            )
                .into_response(),
            Err(e) => {
                error!("Failed to encode plugin response: {}", e);
                error_response(format!("failed to encode response: {}", e))
            }
        }
    }
}

fn error_response(message: String) -> Response {
    let body = serde_json::to_vec(&ErrorResponse { err: message })
        .unwrap_or_else(|_| br#"{"Err":"internal error"}"#.to_vec());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

impl IntoResponse for DriverError {
    fn into_response(self) -> Response {
        debug!(kind = self.kind(), "Plugin request failed: {}", self);
        error_response(self.to_string())
    }
}

type PluginResult<T> = Result<PluginResponse<T>>;

/// Decode a request body; an empty body is the default request
fn decode<T: DeserializeOwned + Default>(what: &str, body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| DriverError::invalid(format!("malformed {} request: {}", what, e)))
}

/// Docker always sends the ids; an empty one would name `ovsbr-` or `ethc`
fn require_id<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(DriverError::invalid(format!("{} is required", field)));
    }
    Ok(value)
}

/// Router serving every endpoint of the remote network driver protocol
pub fn create_router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .with_state(driver)
}

// === Handlers ===

async fn activate() -> PluginResponse<ActivateResponse> {
    debug!("Plugin.Activate");
    PluginResponse(ActivateResponse::default())
}

async fn capabilities() -> PluginResponse<CapabilitiesResponse> {
    PluginResponse(CapabilitiesResponse::local())
}

async fn create_network(
    State(driver): State<Arc<Driver>>,
    body: Bytes,
) -> PluginResult<EmptyResponse> {
    let req: CreateNetworkRequest = decode("CreateNetwork", &body)?;
    let network_id = require_id("NetworkID", &req.network_id)?;
    let options = BridgeOptions::from_request(req.options.as_ref())?;
    let gateway = match req.ipv4() {
        Some(ipam) => GatewayHint::from_ipam(&ipam.gateway, &ipam.pool)?,
        None => GatewayHint::none(),
    };
    driver.create_network(network_id, &options, gateway).await?;
    Ok(PluginResponse(EmptyResponse {}))
}

async fn delete_network(
    State(driver): State<Arc<Driver>>,
    body: Bytes,
) -> PluginResult<EmptyResponse> {
    let req: NetworkRequest = decode("DeleteNetwork", &body)?;
    driver
        .delete_network(require_id("NetworkID", &req.network_id)?)
        .await?;
    Ok(PluginResponse(EmptyResponse {}))
}

async fn allocate_network(body: Bytes) -> PluginResult<AllocateNetworkResponse> {
    let req: AllocateNetworkRequest = decode("AllocateNetwork", &body)?;
    debug!("AllocateNetwork {} (nothing to allocate)", req.network_id);
    Ok(PluginResponse(AllocateNetworkResponse::default()))
}

async fn free_network(body: Bytes) -> PluginResult<EmptyResponse> {
    let req: NetworkRequest = decode("FreeNetwork", &body)?;
    debug!("FreeNetwork {}", req.network_id);
    Ok(PluginResponse(EmptyResponse {}))
}

async fn create_endpoint(body: Bytes) -> PluginResult<CreateEndpointResponse> {
    let req: CreateEndpointRequest = decode("CreateEndpoint", &body)?;
    debug!(
        "CreateEndpoint {} on network {} ({:?})",
        req.endpoint_id, req.network_id, req.interface
    );
    Ok(PluginResponse(CreateEndpointResponse::default()))
}

async fn delete_endpoint(body: Bytes) -> PluginResult<EmptyResponse> {
    let req: EndpointRequest = decode("DeleteEndpoint", &body)?;
    debug!("DeleteEndpoint {} on network {}", req.endpoint_id, req.network_id);
    Ok(PluginResponse(EmptyResponse {}))
}

async fn endpoint_info(body: Bytes) -> PluginResult<InfoResponse> {
    let req: EndpointRequest = decode("EndpointOperInfo", &body)?;
    debug!("EndpointOperInfo {} on network {}", req.endpoint_id, req.network_id);
    Ok(PluginResponse(InfoResponse::default()))
}

async fn join(State(driver): State<Arc<Driver>>, body: Bytes) -> PluginResult<JoinResponse> {
    let req: JoinRequest = decode("Join", &body)?;
    let info = driver
        .join(
            require_id("NetworkID", &req.network_id)?,
            require_id("EndpointID", &req.endpoint_id)?,
        )
        .await?;
    Ok(PluginResponse(info.into()))
}

async fn leave(State(driver): State<Arc<Driver>>, body: Bytes) -> PluginResult<EmptyResponse> {
    let req: EndpointRequest = decode("Leave", &body)?;
    driver
        .leave(
            require_id("NetworkID", &req.network_id)?,
            require_id("EndpointID", &req.endpoint_id)?,
        )
        .await?;
    Ok(PluginResponse(EmptyResponse {}))
}

async fn discover_new(body: Bytes) -> PluginResult<EmptyResponse> {
    let note: DiscoveryNotification = decode("DiscoverNew", &body)?;
    debug!("DiscoverNew type {}", note.discovery_type);
    Ok(PluginResponse(EmptyResponse {}))
}

async fn discover_delete(body: Bytes) -> PluginResult<EmptyResponse> {
    let note: DiscoveryNotification = decode("DiscoverDelete", &body)?;
    debug!("DiscoverDelete type {}", note.discovery_type);
    Ok(PluginResponse(EmptyResponse {}))
}

async fn program_external_connectivity(body: Bytes) -> PluginResult<EmptyResponse> {
    let req: ProgramExternalConnectivityRequest =
        decode("ProgramExternalConnectivity", &body)?;
    debug!(
        "ProgramExternalConnectivity {} on network {} (no-op)",
        req.endpoint_id, req.network_id
    );
    Ok(PluginResponse(EmptyResponse {}))
}

async fn revoke_external_connectivity(body: Bytes) -> PluginResult<EmptyResponse> {
    let req: EndpointRequest = decode("RevokeExternalConnectivity", &body)?;
    debug!(
        "RevokeExternalConnectivity {} on network {} (no-op)",
        req.endpoint_id, req.network_id
    );
    Ok(PluginResponse(EmptyResponse {}))
}
