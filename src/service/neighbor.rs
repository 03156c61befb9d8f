// Neighbor management
// A neighbor is another registry this node gossips with directly. Joining is
// a who-are-you handshake: the neighbor's opaque id becomes the record key,
// and a full-table snapshot is pushed right after (by the owning registry).

use reqwest::Client;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::api::model::WhoReply;
use crate::error::RegistryError;
use crate::model::registry::Neighbor;

pub struct NeighborManager {
    neighbors: DashMap<String, Neighbor>,
    client: Client,
}

impl NeighborManager {
    pub fn new(client: Client) -> Self {
        NeighborManager {
            neighbors: DashMap::new(),
            client,
        }
    }

    /// Synchronous who-are-you query: asks the registry at `addr` for its
    /// opaque node id.
    pub async fn handshake(&self, addr: &str) -> Result<String, RegistryError> {
        let url = format!("http://{}/archimedes/who", addr);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::NetworkError(format!("who-are-you to {}: {}", addr, e)))?;

        if !response.status().is_success() {
            return Err(RegistryError::NetworkError(format!(
                "who-are-you to {} returned status {}",
                addr,
                response.status()
            )));
        }

        let reply: WhoReply = response
            .json()
            .await
            .map_err(|e| RegistryError::NetworkError(format!("who-are-you reply from {}: {}", addr, e)))?;

        debug!("{} identified itself as {}", addr, reply.id);
        Ok(reply.id)
    }

    /// Stores a neighbor record. Identity is the key: a record carrying the
    /// same address under a previous identity is replaced.
    pub fn insert(&self, neighbor: Neighbor) {
        let stale: Vec<String> = self
            .neighbors
            .iter()
            .filter(|e| e.value().addr == neighbor.addr && e.key() != &neighbor.id)
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            debug!("replacing neighbor record {} at {}", id, neighbor.addr);
            self.neighbors.remove(&id);
        }

        info!("added neighbor {} in {}", neighbor.id, neighbor.addr);
        self.neighbors.insert(neighbor.id.clone(), neighbor);
    }

    pub fn remove(&self, neighbor_id: &str) -> Option<Neighbor> {
        self.neighbors.remove(neighbor_id).map(|(_, n)| n)
    }

    pub fn get(&self, neighbor_id: &str) -> Option<Neighbor> {
        self.neighbors.get(neighbor_id).map(|n| n.value().clone())
    }

    pub fn all(&self) -> Vec<Neighbor> {
        self.neighbors.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_manager() -> NeighborManager {
        NeighborManager::new(Client::new())
    }

    #[test]
    fn test_insert_and_get() {
        let manager = create_manager();
        manager.insert(Neighbor {
            id: "node-2".to_string(),
            addr: "10.0.0.2:50000".to_string(),
        });

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get("node-2").unwrap().addr, "10.0.0.2:50000");
    }

    #[test]
    fn test_same_address_new_identity_replaces() {
        let manager = create_manager();
        manager.insert(Neighbor {
            id: "node-2".to_string(),
            addr: "10.0.0.2:50000".to_string(),
        });
        manager.insert(Neighbor {
            id: "node-2-reborn".to_string(),
            addr: "10.0.0.2:50000".to_string(),
        });

        assert_eq!(manager.len(), 1);
        assert!(manager.get("node-2").is_none());
        assert!(manager.get("node-2-reborn").is_some());
    }

    #[test]
    fn test_remove() {
        let manager = create_manager();
        manager.insert(Neighbor {
            id: "node-2".to_string(),
            addr: "10.0.0.2:50000".to_string(),
        });

        assert!(manager.remove("node-2").is_some());
        assert!(manager.is_empty());
        assert!(manager.remove("node-2").is_none());
    }
}
