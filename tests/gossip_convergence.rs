// Gossip convergence across a chain of nodes, exercised at the component
// level: each hop is one ingest of the previous node's table contents.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use uuid::Uuid;

use archimedes::api::model::DiscoverMessage;
use archimedes::model::registry::{
    Instance, Port, PortBinding, PortSet, PortSettings, Service,
};
use archimedes::service::gossip::{GossipConfig, GossipProtocol};
use archimedes::service::neighbor::NeighborManager;
use archimedes::service::table::ServicesTable;

struct Node {
    id: String,
    table: Arc<ServicesTable>,
    gossip: Arc<GossipProtocol>,
}

fn create_node(id: &str) -> Node {
    let table = Arc::new(ServicesTable::new());
    let neighbors = Arc::new(NeighborManager::new(Client::new()));
    let gossip = Arc::new(GossipProtocol::new(
        id.to_string(),
        GossipConfig::default(),
        table.clone(),
        neighbors,
        Client::new(),
    ));

    Node {
        id: id.to_string(),
        table,
        gossip,
    }
}

async fn register_service_with_instance(node: &Node, service_id: &str, instance_id: &str) {
    let mut ports = PortSet::new();
    ports.insert(Port::tcp(8080), PortSettings::default());

    let mut translation = HashMap::new();
    translation.insert(
        Port::tcp(8080),
        vec![PortBinding {
            host_ip: String::new(),
            host_port: "32001".to_string(),
        }],
    );

    let mut instances = HashMap::new();
    instances.insert(
        instance_id.to_string(),
        Instance {
            id: instance_id.to_string(),
            service_id: service_id.to_string(),
            ip: "10.0.0.7".to_string(),
            port_translation: translation,
            initialized: true,
            is_static: false,
            local: false,
        },
    );

    let entry = archimedes::api::model::DiscoverEntry {
        host: node.id.clone(),
        host_addr: format!("{}:50000", node.id),
        service: Service {
            id: service_id.to_string(),
            ports,
        },
        instances,
        number_of_hops: 0,
        max_hops: 0,
        version: 0,
    };

    assert!(node.table.add_service(entry).await);
}

/// The message a node would relay onward: its current entries under a fresh
/// message id, with itself as the relaying neighbor.
async fn relayed_message(node: &Node, origin: &str) -> DiscoverMessage {
    DiscoverMessage {
        message_id: Uuid::new_v4(),
        origin: origin.to_string(),
        neighbor_sent: node.id.clone(),
        entries: node.table.snapshot_entries().await,
    }
}

#[tokio::test]
async fn test_gossip_reaches_exactly_the_hop_horizon() {
    let node_a = create_node("node-a");
    let node_b = create_node("node-b");
    let node_c = create_node("node-c");
    let node_d = create_node("node-d");

    register_service_with_instance(&node_a, "svcB", "i1").await;

    // A -> B: one relay.
    let msg = node_a.table.to_discover_msg(&node_a.id, 2).await.unwrap();
    assert!(node_b.gossip.ingest(None, msg).await);
    let entries = node_b.table.snapshot_entries().await;
    assert_eq!(entries["svcB"].number_of_hops, 1);
    assert_eq!(entries["svcB"].max_hops, 2);

    // B -> C: two relays, right at the horizon.
    let msg = relayed_message(&node_b, &node_a.id).await;
    assert!(node_c.gossip.ingest(None, msg).await);
    let entries = node_c.table.snapshot_entries().await;
    assert_eq!(entries["svcB"].number_of_hops, 2);

    // C -> D: beyond the horizon; D never learns the service.
    let msg = relayed_message(&node_c, &node_a.id).await;
    assert!(!node_d.gossip.ingest(None, msg).await);
    assert!(node_d.table.is_empty());
}

#[tokio::test]
async fn test_snapshot_round_trip_preserves_instances() {
    let node_a = create_node("node-a");
    let node_b = create_node("node-b");

    register_service_with_instance(&node_a, "svcB", "i1").await;

    let msg = node_a.table.to_discover_msg(&node_a.id, 2).await.unwrap();
    assert!(node_b.gossip.ingest(None, msg).await);

    let instance = node_b.table.get_instance("i1").unwrap();
    assert_eq!(instance.service_id, "svcB");
    assert_eq!(instance.ip, "10.0.0.7");
    assert_eq!(
        node_b.table.get_service("svcB").await.unwrap(),
        node_a.table.get_service("svcB").await.unwrap()
    );
}

#[tokio::test]
async fn test_duplicate_message_is_ignored_but_new_versions_win() {
    let node_a = create_node("node-a");
    let node_b = create_node("node-b");

    register_service_with_instance(&node_a, "svcB", "i1").await;

    let msg = node_a.table.to_discover_msg(&node_a.id, 2).await.unwrap();
    let replay = msg.clone();
    assert!(node_b.gossip.ingest(None, msg).await);
    assert!(!node_b.gossip.ingest(None, replay).await);

    // A deletes the instance: the entry version moves and the next snapshot
    // removes the instance on B too.
    node_a.table.delete_instance("svcB", "i1").await.unwrap();
    let msg = node_a.table.to_discover_msg(&node_a.id, 2).await.unwrap();
    assert!(node_b.gossip.ingest(None, msg).await);

    assert!(node_b.table.get_instance("i1").is_none());
    let entries = node_b.table.snapshot_entries().await;
    assert!(entries["svcB"].instances.is_empty());
}

#[tokio::test]
async fn test_node_ignores_gossip_about_itself() {
    let node_a = create_node("node-a");
    let node_b = create_node("node-b");

    register_service_with_instance(&node_a, "svcB", "i1").await;

    // The snapshot comes back to A through B; the self-filter drops it.
    let msg = node_a.table.to_discover_msg(&node_a.id, 2).await.unwrap();
    node_b.gossip.ingest(None, msg).await;

    let back = relayed_message(&node_b, &node_a.id).await;
    assert!(!node_a.gossip.ingest(None, back).await);

    let entries = node_a.table.snapshot_entries().await;
    assert_eq!(entries["svcB"].number_of_hops, 0);
}
