//! Route discovery and relaying across nodes with no direct link.
//!
//! Topology: a requester and a target in different geographic areas, both
//! bootstrapped to a common relay. Area-scoped announce flooding guarantees
//! the two never hear each other's announces, so reaching the target
//! requires discovery through the relay.

use ipv7_mesh::MeshError;

use crate::test_utils::*;

#[tokio::test]
async fn discovery_finds_a_route_through_a_relay() {
    let (relay, _relay_rx) = spawn_node("hop-disc-relay", NYC, Vec::new()).await;
    let (requester, _req_rx) =
        spawn_node("hop-disc-req", NYC, vec![memory_endpoint("hop-disc-relay")]).await;
    let (target, _target_rx) = spawn_node(
        "hop-disc-target",
        SKAGEN,
        vec![memory_endpoint("hop-disc-relay")],
    )
    .await;

    wait_for_peers(&relay, 2).await;
    wait_for_peers(&requester, 1).await;

    // The requester has never heard of the target.
    let err = requester
        .send(target.address().clone(), b"x".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::NoRoute { .. }));

    let route = requester.discover(target.address().clone()).await.unwrap();
    assert_eq!(route.destination.node_id, target.address().node_id);
    assert_eq!(route.next_hop.node_id, relay.address().node_id);
    assert!(route.hop_count >= 2);

    requester.stop().await.unwrap();
    target.stop().await.unwrap();
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn data_is_relayed_along_the_discovered_route() {
    let (relay, _relay_rx) = spawn_node("hop-data-relay", NYC, Vec::new()).await;
    let (requester, _req_rx) =
        spawn_node("hop-data-req", NYC, vec![memory_endpoint("hop-data-relay")]).await;
    let (target, mut target_rx) = spawn_node(
        "hop-data-target",
        SKAGEN,
        vec![memory_endpoint("hop-data-relay")],
    )
    .await;

    wait_for_peers(&relay, 2).await;
    wait_for_peers(&requester, 1).await;

    requester.discover(target.address().clone()).await.unwrap();
    requester
        .send(target.address().clone(), b"two hops away".to_vec())
        .await
        .unwrap();

    let delivery = expect_delivery(&mut target_rx).await;
    assert_eq!(delivery.payload, b"two hops away");
    assert_eq!(delivery.source.node_id, requester.address().node_id);

    requester.stop().await.unwrap();
    target.stop().await.unwrap();
    relay.stop().await.unwrap();
}

#[tokio::test]
async fn discovery_of_an_absent_node_times_out() {
    let (relay, _relay_rx) = spawn_node("hop-miss-relay", NYC, Vec::new()).await;
    let (requester, _req_rx) =
        spawn_node("hop-miss-req", NYC, vec![memory_endpoint("hop-miss-relay")]).await;

    wait_for_peers(&requester, 1).await;

    let ghost = ipv7_wire::Address::from_parts(
        ipv7_wire::AddressFlags::Unicast,
        "u4pr",
        [0x42; 16],
        None,
    )
    .unwrap();
    let err = requester.discover(ghost).await.unwrap_err();
    assert!(matches!(err, MeshError::DiscoveryTimeout { .. }));

    requester.stop().await.unwrap();
    relay.stop().await.unwrap();
}
