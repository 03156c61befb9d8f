// Discover-message gossip protocol
// Hop-bounded flooding with loop suppression: incoming messages are deduped
// by message id, merged into the services table under version rules, and
// re-broadcast after a short random jitter to every neighbor except the
// origin and the relay.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use rand::Rng;
use reqwest::Client;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::api::model::DiscoverMessage;
use crate::model::common::DEFAULT_SERVER_PORT;
use crate::model::registry::Neighbor;
use crate::service::neighbor::NeighborManager;
use crate::service::table::ServicesTable;

const REBROADCAST_JITTER_MS: u64 = 500;
const SEEN_SET_CAPACITY: u64 = 100_000;

#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Hop horizon stamped on locally-originated entries.
    pub horizon: u32,
    /// How long a message id stays in the seen set.
    pub seen_ttl: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig {
            horizon: 2,
            seen_ttl: Duration::from_secs(600),
        }
    }
}

pub struct GossipProtocol {
    local_id: String,
    config: GossipConfig,
    table: Arc<ServicesTable>,
    neighbors: Arc<NeighborManager>,
    seen: Cache<Uuid, ()>,
    client: Client,
}

impl GossipProtocol {
    pub fn new(
        local_id: String,
        config: GossipConfig,
        table: Arc<ServicesTable>,
        neighbors: Arc<NeighborManager>,
        client: Client,
    ) -> Self {
        let seen = Cache::builder()
            .max_capacity(SEEN_SET_CAPACITY)
            .time_to_live(config.seen_ttl)
            .build();

        GossipProtocol {
            local_id,
            config,
            table,
            neighbors,
            seen,
            client,
        }
    }

    pub fn horizon(&self) -> u32 {
        self.config.horizon
    }

    /// Ingests an incoming discover message. Returns whether the table
    /// changed. Unseen messages are re-broadcast on a background task after a
    /// 0-500 ms jitter.
    pub async fn ingest(
        self: &Arc<Self>,
        peer_ip: Option<IpAddr>,
        mut msg: DiscoverMessage,
    ) -> bool {
        if self.seen.contains_key(&msg.message_id) {
            debug!("dropping already seen message {}", msg.message_id);
            return false;
        }

        self.preprocess(peer_ip, &mut msg);

        // Hops count relays: one more on reception. Entries past their TTL
        // never reach the table.
        for entry in msg.entries.values_mut() {
            entry.number_of_hops += 1;
        }
        msg.entries.retain(|service_id, entry| {
            let within = entry.number_of_hops <= entry.max_hops;
            if !within {
                debug!(
                    "dropping entry {} at {} hops (max {})",
                    service_id, entry.number_of_hops, entry.max_hops
                );
            }
            within
        });

        let changed = self
            .table
            .update_table_with_discover_message(&self.local_id, &msg)
            .await;

        self.seen.insert(msg.message_id, ());

        if !msg.entries.is_empty() {
            let relayed_from = msg.neighbor_sent.clone();
            self.clone().propagate(msg, relayed_from);
        }

        changed
    }

    /// Entries advertised by the sending node itself carry whatever address
    /// it believes it has; the address observed on the transport is the one
    /// other nodes can actually reach, so it wins.
    fn preprocess(&self, peer_ip: Option<IpAddr>, msg: &mut DiscoverMessage) {
        let Some(ip) = peer_ip else { return };

        for entry in msg.entries.values_mut() {
            if entry.host != msg.neighbor_sent {
                continue;
            }

            let port = entry
                .host_addr
                .rsplit_once(':')
                .map(|(_, port)| port.to_string())
                .unwrap_or_else(|| DEFAULT_SERVER_PORT.to_string());
            entry.host_addr = format!("{}:{}", ip, port);

            for instance in entry.instances.values_mut() {
                if !instance.local {
                    instance.ip = ip.to_string();
                }
            }
        }
    }

    /// Re-broadcast on a background task. Skips the message origin and the
    /// neighbor it was relayed by, stamps the local node as the relay, and
    /// suppresses the message entirely once every entry would exceed its TTL
    /// on the next hop.
    fn propagate(self: Arc<Self>, mut msg: DiscoverMessage, relayed_from: String) {
        tokio::spawn(async move {
            let jitter = rand::thread_rng().gen_range(0..REBROADCAST_JITTER_MS);
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let survives = msg
                .entries
                .values()
                .any(|e| e.number_of_hops + 1 <= e.max_hops);
            if !survives {
                debug!("not propagating message {}: hop limit reached", msg.message_id);
                return;
            }

            let origin = msg.origin.clone();
            msg.neighbor_sent = self.local_id.clone();

            for neighbor in self.neighbors.all() {
                if neighbor.id == origin {
                    debug!(
                        "not propagating message {} to {}: message origin",
                        msg.message_id, neighbor.id
                    );
                    continue;
                }
                if neighbor.id == relayed_from {
                    debug!(
                        "not propagating message {} to {}: relayed it here",
                        msg.message_id, neighbor.id
                    );
                    continue;
                }

                self.send_discover(&neighbor, &msg).await;
            }
        });
    }

    /// Builds a fresh full-table snapshot and pushes it to every neighbor.
    /// Called after local mutations and by the anti-entropy timer.
    pub async fn broadcast_snapshot(&self) {
        let Some(msg) = self
            .table
            .to_discover_msg(&self.local_id, self.config.horizon)
            .await
        else {
            return;
        };

        for neighbor in self.neighbors.all() {
            self.send_discover(&neighbor, &msg).await;
        }
    }

    /// Pushes a full-table snapshot to one neighbor, as done right after a
    /// join handshake.
    pub async fn send_snapshot_to(&self, neighbor: &Neighbor) {
        let Some(msg) = self
            .table
            .to_discover_msg(&self.local_id, self.config.horizon)
            .await
        else {
            return;
        };

        self.send_discover(neighbor, &msg).await;
    }

    /// Periodic anti-entropy push of the full table.
    pub fn start_anti_entropy(self: &Arc<Self>, interval: Duration) {
        let gossip = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                gossip.broadcast_snapshot().await;
            }
        });
    }

    async fn send_discover(&self, neighbor: &Neighbor, msg: &DiscoverMessage) {
        let url = format!("http://{}/archimedes/discover", neighbor.addr);

        match self.client.post(&url).json(msg).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("sent message {} to {}", msg.message_id, neighbor.id);
            }
            Ok(response) => {
                // A reachable neighbor refusing gossip means our view of it
                // is broken; drop the record until it rejoins.
                error!(
                    "neighbor {} returned status {} on discover; dropping it",
                    neighbor.id,
                    response.status()
                );
                self.neighbors.remove(&neighbor.id);
            }
            Err(e) => {
                warn!("failed to send discover to {}: {}", neighbor.id, e);
            }
        }
    }
}
