//! Network and endpoint lifecycle against recording fakes

mod common;

use common::{driver, Call};
use don_driver::options::{BIND_INTERFACE_OPTION, MODE_OPTION, MTU_OPTION};
use don_driver::{BridgeMode, BridgeOptions, DriverError, GatewayHint};
use std::net::Ipv4Addr;

fn gateway(gw: &str) -> GatewayHint {
    GatewayHint::from_ipam(gw, "").unwrap()
}

#[tokio::test]
async fn test_create_network_defaults() {
    let (driver, world) = driver();

    let state = driver
        .create_network("net1", &BridgeOptions::default(), gateway("10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(state.bridge_name, "ovsbr-net1");
    assert_eq!(state.mtu, 1500);
    assert_eq!(state.mode, BridgeMode::Nat);
    assert_eq!(state.gateway, Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(driver.network("net1").await, Some(state));
    assert_eq!(world.calls(), vec![Call::InitBridge("ovsbr-net1".into())]);
}

#[tokio::test]
async fn test_create_then_delete_leaves_registry_empty() {
    let (driver, world) = driver();

    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    driver.delete_network("net1").await.unwrap();

    assert!(driver.networks().await.is_empty());
    assert_eq!(
        world.calls(),
        vec![
            Call::InitBridge("ovsbr-net1".into()),
            Call::DeleteBridge("ovsbr-net1".into()),
        ]
    );
}

#[tokio::test]
async fn test_bridge_init_failure_rolls_back_registration() {
    let (driver, world) = driver();
    world.fail("init_bridge");

    let err = driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::OperationFailed { .. }));
    assert!(driver.network("net1").await.is_none());
}

#[tokio::test]
async fn test_bridge_name_clash_is_rejected_before_switch() {
    let (driver, world) = driver();
    driver
        .create_network("abcde111", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();

    let err = driver
        .create_network("abcde222", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidConfiguration(_)));

    let named = BridgeOptions {
        bridge_name: Some("ovsbr-abcde".into()),
        ..Default::default()
    };
    let err = driver
        .create_network("fffff333", &named, GatewayHint::none())
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::InvalidConfiguration(_)));

    assert_eq!(world.calls(), vec![Call::InitBridge("ovsbr-abcde".into())]);
    assert_eq!(driver.networks().await.len(), 1);
    assert!(driver.network("abcde222").await.is_none());
}

#[tokio::test]
async fn test_failed_recreate_keeps_existing_network() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), gateway("10.0.0.1"))
        .await
        .unwrap();
    world.fail("init_bridge");

    assert!(driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .is_err());
    let state = driver.network("net1").await.unwrap();
    assert_eq!(state.gateway_string(), "10.0.0.1");

    driver.delete_network("net1").await.unwrap();
    assert!(driver.network("net1").await.is_none());
}

#[tokio::test]
async fn test_delete_unknown_network() {
    let (driver, world) = driver();
    let err = driver.delete_network("missing").await.unwrap_err();
    assert!(matches!(err, DriverError::NotFound(_)));
    assert!(world.calls().is_empty());
}

#[tokio::test]
async fn test_delete_failure_keeps_network() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.fail("delete_bridge");

    assert!(driver.delete_network("net1").await.is_err());
    assert!(driver.network("net1").await.is_some());

    world.heal("delete_bridge");
    driver.delete_network("net1").await.unwrap();
    assert!(driver.network("net1").await.is_none());
}

#[tokio::test]
async fn test_join_registered_network() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), gateway("10.0.0.1"))
        .await
        .unwrap();
    world.clear();

    let info = driver.join("net1", "endpoint12345").await.unwrap();

    assert_eq!(info.src_name, "ethcendpo");
    assert_eq!(info.dst_prefix, "eth");
    assert_eq!(info.gateway, "10.0.0.1");
    assert_eq!(
        world.calls(),
        vec![
            Call::CreatePair("ovs-veth0-endpo".into(), "ethcendpo".into()),
            Call::BringUp("ovs-veth0-endpo".into()),
            Call::AddPort("ovsbr-net1".into(), "ovs-veth0-endpo".into()),
        ]
    );
}

#[tokio::test]
async fn test_join_recovers_network_from_docker_once() {
    let (driver, world) = driver();
    world.docker_network(
        "6f1c9d2e4b7a",
        &[(MTU_OPTION, "9000"), (MODE_OPTION, "flat"), (BIND_INTERFACE_OPTION, "eth1")],
        GatewayHint::from_ipam("172.30.0.1", "172.30.0.0/16").unwrap(),
    );

    let info = driver.join("6f1c9d2e4b7a", "aaaaabbbbb").await.unwrap();
    assert_eq!(info.gateway, "172.30.0.1");

    let state = driver.network("6f1c9d2e4b7a").await.unwrap();
    assert_eq!(state.bridge_name, "ovsbr-6f1c9");
    assert_eq!(state.mtu, 9000);
    assert_eq!(state.mode, BridgeMode::Flat);
    assert_eq!(state.gateway_mask, Some(16));
    assert_eq!(state.bind_interface.as_deref(), Some("eth1"));

    driver.join("6f1c9d2e4b7a", "cccccddddd").await.unwrap();
    let lookups = world
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Lookup(_)))
        .count();
    assert_eq!(lookups, 1);
}

#[tokio::test]
async fn test_concurrent_joins_recover_network_once() {
    let (driver, world) = driver();
    world.docker_network("6f1c9d2e4b7a", &[], GatewayHint::none());

    let (first, second) = tokio::join!(
        driver.join("6f1c9d2e4b7a", "aaaaabbbbb"),
        driver.join("6f1c9d2e4b7a", "cccccddddd"),
    );
    first.unwrap();
    second.unwrap();

    let calls = world.calls();
    let count = |wanted: fn(&Call) -> bool| calls.iter().filter(|c| wanted(c)).count();
    assert_eq!(count(|c| matches!(c, Call::Lookup(_))), 1);
    assert_eq!(count(|c| matches!(c, Call::InitBridge(_))), 1);
    assert_eq!(count(|c| matches!(c, Call::AddPort(..))), 2);
}

#[tokio::test]
async fn test_join_foreign_network_mutates_nothing() {
    let (driver, world) = driver();
    world.foreign_network("bridge0");

    let err = driver.join("bridge0", "endpoint12345").await.unwrap_err();

    assert!(matches!(err, DriverError::NotFound(_)));
    assert_eq!(world.calls(), vec![Call::Lookup("bridge0".into())]);
    assert!(!world.calls().iter().any(Call::is_mutation));
    assert!(driver.network("bridge0").await.is_none());
}

#[tokio::test]
async fn test_join_recovered_network_with_bad_mode() {
    let (driver, world) = driver();
    world.docker_network("net9", &[(MODE_OPTION, "routed")], GatewayHint::none());

    let err = driver.join("net9", "endpoint12345").await.unwrap_err();
    assert!(matches!(err, DriverError::InvalidConfiguration(_)));
    assert!(!world.calls().iter().any(Call::is_mutation));
}

#[tokio::test]
async fn test_join_rolls_back_pair_when_attach_fails() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.clear();
    world.fail("add_port");

    assert!(driver.join("net1", "endpoint12345").await.is_err());
    assert_eq!(
        world.calls().last(),
        Some(&Call::DeletePair("ovs-veth0-endpo".into()))
    );
}

#[tokio::test]
async fn test_join_without_pair_does_not_roll_back() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.clear();
    world.fail("create_pair");

    assert!(driver.join("net1", "endpoint12345").await.is_err());
    assert_eq!(
        world.calls(),
        vec![Call::CreatePair("ovs-veth0-endpo".into(), "ethcendpo".into())]
    );
}

#[tokio::test]
async fn test_leave_deletes_link_before_port() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.clear();

    driver.leave("net1", "endpoint12345").await.unwrap();
    assert_eq!(
        world.calls(),
        vec![
            Call::DeletePair("ovs-veth0-endpo".into()),
            Call::DeletePort("ovsbr-net1".into(), "ovs-veth0-endpo".into()),
        ]
    );
}

#[tokio::test]
async fn test_leave_unregistered_network_only_detaches() {
    let (driver, world) = driver();
    world.docker_network("6f1c9d2e4b7a", &[(MODE_OPTION, "flat")], GatewayHint::none());

    driver.leave("6f1c9d2e4b7a", "endpoint12345").await.unwrap();

    assert_eq!(
        world.calls(),
        vec![
            Call::DeletePair("ovs-veth0-endpo".into()),
            Call::Lookup("6f1c9d2e4b7a".into()),
            Call::DeletePort("ovsbr-6f1c9".into(), "ovs-veth0-endpo".into()),
        ]
    );
    assert!(driver.network("6f1c9d2e4b7a").await.is_none());
}

#[tokio::test]
async fn test_leave_link_failure_still_detaches_port() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.clear();
    world.fail("delete_pair");

    driver.leave("net1", "endpoint12345").await.unwrap();
    assert_eq!(
        world.calls()[1],
        Call::DeletePort("ovsbr-net1".into(), "ovs-veth0-endpo".into())
    );
}

#[tokio::test]
async fn test_leave_port_failure_is_propagated() {
    let (driver, world) = driver();
    driver
        .create_network("net1", &BridgeOptions::default(), GatewayHint::none())
        .await
        .unwrap();
    world.fail("delete_port");

    let err = driver.leave("net1", "endpoint12345").await.unwrap_err();
    assert!(err.to_string().contains("injected failure"));
}

#[tokio::test]
async fn test_concurrent_creates() {
    let (driver, world) = driver();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let driver = driver.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("{:02}network", i);
            driver
                .create_network(&id, &BridgeOptions::default(), GatewayHint::none())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(driver.networks().await.len(), 16);
    assert_eq!(world.calls().len(), 16);
}
