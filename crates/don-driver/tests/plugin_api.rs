//! Docker plugin endpoints through the axum router

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{driver, Call};
use don_driver::api::PLUGIN_CONTENT_TYPE;
use don_driver::plugin::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(router: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    // Docker sends no Content-Type header
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        PLUGIN_CONTENT_TYPE
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_activate_and_capabilities() {
    let (driver, _) = driver();
    let router = create_router(driver);

    let request = Request::builder()
        .method("POST")
        .uri("/Plugin.Activate")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"Implements": ["NetworkDriver"]}));

    let (status, body) = call(&router, "/NetworkDriver.GetCapabilities", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Scope": "local", "ConnectivityScope": "local"}));
}

#[tokio::test]
async fn test_network_and_endpoint_lifecycle() {
    let (driver, world) = driver();
    let router = create_router(driver.clone());

    let (status, body) = call(
        &router,
        "/NetworkDriver.CreateNetwork",
        json!({
            "NetworkID": "net1",
            "Options": {
                "com.docker.network.generic": {
                    "net.gopher.ovs.bridge.mtu": "1450"
                }
            },
            "IPv4Data": [{"AddressSpace": "LocalDefault", "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24"}],
            "IPv6Data": []
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let state = driver.network("net1").await.unwrap();
    assert_eq!(state.mtu, 1450);
    assert_eq!(state.gateway_mask, Some(24));

    let (status, body) = call(
        &router,
        "/NetworkDriver.CreateEndpoint",
        json!({"NetworkID": "net1", "EndpointID": "endpoint12345", "Interface": {"Address": "10.0.0.2/24"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = call(
        &router,
        "/NetworkDriver.Join",
        json!({"NetworkID": "net1", "EndpointID": "endpoint12345", "SandboxKey": "/var/run/docker/netns/abc"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "InterfaceName": {"SrcName": "ethcendpo", "DstPrefix": "eth"},
            "Gateway": "10.0.0.1"
        })
    );

    let (_, body) = call(
        &router,
        "/NetworkDriver.EndpointOperInfo",
        json!({"NetworkID": "net1", "EndpointID": "endpoint12345"}),
    )
    .await;
    assert_eq!(body, json!({"Value": {}}));

    let (status, _) = call(
        &router,
        "/NetworkDriver.Leave",
        json!({"NetworkID": "net1", "EndpointID": "endpoint12345"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &router,
        "/NetworkDriver.DeleteNetwork",
        json!({"NetworkID": "net1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(driver.networks().await.is_empty());
    assert_eq!(
        world.calls().last(),
        Some(&Call::DeleteBridge("ovsbr-net1".into()))
    );
}

#[tokio::test]
async fn test_invalid_mode_is_reported_as_err() {
    let (driver, world) = driver();
    let router = create_router(driver.clone());

    let (status, body) = call(
        &router,
        "/NetworkDriver.CreateNetwork",
        json!({
            "NetworkID": "net1",
            "Options": {"com.docker.network.generic": {"net.gopher.ovs.bridge.mode": "bogus"}}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("bogus"));
    assert!(driver.network("net1").await.is_none());
    assert!(world.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_network_is_reported_as_err() {
    let (driver, _) = driver();
    let router = create_router(driver);

    let (status, body) = call(
        &router,
        "/NetworkDriver.DeleteNetwork",
        json!({"NetworkID": "missing"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["Err"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_malformed_body() {
    let (driver, _) = driver();
    let router = create_router(driver);

    let request = Request::builder()
        .method("POST")
        .uri("/NetworkDriver.Join")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_missing_ids_are_rejected() {
    let (driver, world) = driver();
    let router = create_router(driver.clone());

    for (path, body) in [
        ("/NetworkDriver.CreateNetwork", json!({"NetworkID": ""})),
        ("/NetworkDriver.DeleteNetwork", json!({"NetworkID": " "})),
        ("/NetworkDriver.Join", json!({"NetworkID": "net1", "EndpointID": ""})),
        ("/NetworkDriver.Leave", json!({"NetworkID": "", "EndpointID": "endpoint12345"})),
    ] {
        let (status, body) = call(&router, path, body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{}", path);
        assert!(body["Err"].as_str().unwrap().contains("is required"), "{}", path);
    }

    // An empty body decodes to a request with no ids
    let request = Request::builder()
        .method("POST")
        .uri("/NetworkDriver.Join")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["Err"], "Invalid network configuration: NetworkID is required");

    assert!(world.calls().is_empty());
    assert!(driver.networks().await.is_empty());
}

#[tokio::test]
async fn test_noop_hooks() {
    let (driver, world) = driver();
    let router = create_router(driver);

    for path in [
        "/NetworkDriver.DeleteEndpoint",
        "/NetworkDriver.ProgramExternalConnectivity",
        "/NetworkDriver.RevokeExternalConnectivity",
        "/NetworkDriver.FreeNetwork",
        "/NetworkDriver.DiscoverNew",
        "/NetworkDriver.DiscoverDelete",
        "/NetworkDriver.AllocateNetwork",
    ] {
        let (status, body) = call(
            &router,
            path,
            json!({"NetworkID": "net1", "EndpointID": "ep1", "DiscoveryType": 1}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", path);
        assert_eq!(body, json!({}), "{}", path);
    }
    assert!(world.calls().is_empty());
}
