// Wire types for the registry HTTP surface
// Request and reply bodies, plus the discover message exchanged between
// neighbor registries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::registry::{Instance, Port, PortMap, PortSet, Service};

pub const STATUS_UP: &str = "UP";
pub const STATUS_OUT_OF_SERVICE: &str = "OUT_OF_SERVICE";

/// Body of `POST /services/{serviceId}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub ports: PortSet,
}

/// Body of `POST /services/{serviceId}/{instanceId}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default)]
    pub port_translation: PortMap,
    #[serde(default)]
    pub local: bool,
}

/// One services-table entry as carried by a discover message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverEntry {
    /// Opaque id of the node that originated this entry.
    pub host: String,
    /// Registry address of the originating node.
    #[serde(default)]
    pub host_addr: String,
    pub service: Service,
    #[serde(default)]
    pub instances: HashMap<String, Instance>,
    pub number_of_hops: u32,
    pub max_hops: u32,
    pub version: u64,
}

/// A gossip datagram: a batch of service-table entries flooded between
/// neighbor registries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverMessage {
    pub message_id: Uuid,
    /// Node id of the message origin.
    pub origin: String,
    /// Node id of the neighbor this message was last relayed by.
    pub neighbor_sent: String,
    pub entries: HashMap<String, DiscoverEntry>,
}

/// Body of `POST /neighbor`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeighborSpec {
    pub addr: String,
}

/// Reply of `GET /who`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhoReply {
    pub id: String,
}

/// Body of `POST /resolve`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub host: String,
    pub port: Port,
}

/// Reply of `POST /resolve`; `port` is the concrete host port as a string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolveReply {
    pub host: String,
    pub port: String,
}

/// Reply of `GET /services/{serviceId}`: the service's ports together with
/// every registered instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstancesReply {
    pub ports: PortSet,
    pub instances_ids: Vec<String>,
    pub instances_map: HashMap<String, Instance>,
}

/// Reply of `GET /instances/{instanceId}`: the instance together with its
/// service's port set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceReply {
    pub ports: PortSet,
    pub instance: Instance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_message_round_trip() {
        let mut entries = HashMap::new();
        entries.insert(
            "svcA".to_string(),
            DiscoverEntry {
                host: "node-1".to_string(),
                host_addr: "10.0.0.1:50000".to_string(),
                service: Service {
                    id: "svcA".to_string(),
                    ports: PortSet::new(),
                },
                instances: HashMap::new(),
                number_of_hops: 1,
                max_hops: 2,
                version: 3,
            },
        );

        let msg = DiscoverMessage {
            message_id: Uuid::new_v4(),
            origin: "node-1".to_string(),
            neighbor_sent: "node-2".to_string(),
            entries,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["neighborSent"], "node-2");
        assert_eq!(json["entries"]["svcA"]["numberOfHops"], 1);
        assert_eq!(json["entries"]["svcA"]["maxHops"], 2);

        let back: DiscoverMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.message_id, msg.message_id);
        assert_eq!(back.entries["svcA"], msg.entries["svcA"]);
    }

    #[test]
    fn test_instance_spec_defaults() {
        let spec: InstanceSpec = serde_json::from_str("{}").unwrap();
        assert!(!spec.is_static);
        assert!(!spec.local);
        assert!(spec.port_translation.is_empty());
    }

    #[test]
    fn test_resolve_request_port_form() {
        let req: ResolveRequest =
            serde_json::from_str(r#"{"host":"svcA","port":"8080/tcp"}"#).unwrap();
        assert_eq!(req.port, Port::tcp(8080));
    }
}
