//! Mesh formation: bootstrap, mutual links, announce propagation.

use crate::test_utils::*;

#[tokio::test]
async fn bootstrap_creates_a_mutual_link() {
    let (hub, _hub_rx) = spawn_node("form-hub", NYC, Vec::new()).await;
    let (joiner, _joiner_rx) =
        spawn_node("form-joiner", NYC, vec![memory_endpoint("form-hub")]).await;

    // The joiner announces to the hub, the hub introduces itself back.
    wait_for_peers(&hub, 1).await;
    wait_for_peers(&joiner, 1).await;

    // Passive learning gave the joiner a route to the hub already.
    let status = joiner.status().await.unwrap();
    assert!(status.routes >= 1);

    joiner.stop().await.unwrap();
    hub.stop().await.unwrap();
}

#[tokio::test]
async fn hub_learns_nodes_from_different_regions() {
    let (hub, _hub_rx) = spawn_node("form-region-hub", NYC, Vec::new()).await;
    let (_local, _local_rx) =
        spawn_node("form-region-local", NYC, vec![memory_endpoint("form-region-hub")]).await;
    let (_remote, _remote_rx) = spawn_node(
        "form-region-remote",
        SKAGEN,
        vec![memory_endpoint("form-region-hub")],
    )
    .await;

    // The remote node's announce names an area the hub is not in; the hub
    // must still register the peer.
    wait_for_peers(&hub, 2).await;
}

#[tokio::test]
async fn direct_data_delivery_between_bootstrapped_nodes() {
    let (receiver, mut receiver_rx) = spawn_node("form-recv", NYC, Vec::new()).await;
    let (sender, _sender_rx) =
        spawn_node("form-send", NYC, vec![memory_endpoint("form-recv")]).await;

    wait_for_peers(&sender, 1).await;
    sender
        .send(receiver.address().clone(), b"first contact".to_vec())
        .await
        .unwrap();

    let delivery = expect_delivery(&mut receiver_rx).await;
    assert_eq!(delivery.payload, b"first contact");
    assert_eq!(delivery.source.node_id, sender.address().node_id);

    sender.stop().await.unwrap();
    receiver.stop().await.unwrap();
}

#[tokio::test]
async fn announces_flood_within_the_geographic_area() {
    // Two NYC nodes joined through a common hub discover each other via the
    // hub's re-flood, without ever bootstrapping to one another.
    let (hub, _hub_rx) = spawn_node("form-flood-hub", NYC, Vec::new()).await;
    let (east, _east_rx) =
        spawn_node("form-flood-east", NYC, vec![memory_endpoint("form-flood-hub")]).await;
    let (west, _west_rx) =
        spawn_node("form-flood-west", NYC, vec![memory_endpoint("form-flood-hub")]).await;

    wait_for_peers(&hub, 2).await;
    // Periodic announces re-flood through the hub until east and west have
    // both the hub and each other.
    wait_for_peers(&east, 2).await;
    wait_for_peers(&west, 2).await;

    east.stop().await.unwrap();
    west.stop().await.unwrap();
    hub.stop().await.unwrap();
}
