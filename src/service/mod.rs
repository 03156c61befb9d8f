// Business services
// The `Registry` value owns every table, lock, background task, and outbound
// client; HTTP handlers only ever see a shared reference to it.

pub mod gossip; // Discover-message flooding
pub mod heartbeat; // Liveness records and the sweep pass
pub mod neighbor; // Who-are-you handshake and neighbor records
pub mod resolver; // (host, port) -> (ip, host-port)
pub mod scheduler; // Workload-scheduler notifications
pub mod table; // The distributed services table

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::model::{DiscoverEntry, DiscoverMessage, InstanceSpec};
use crate::error::RegistryError;
use crate::model::common::DEFAULT_SERVER_PORT;
use crate::model::registry::{Instance, Neighbor, PortSet, Service};

use gossip::{GossipConfig, GossipProtocol};
use heartbeat::HeartbeatMonitor;
use neighbor::NeighborManager;
use resolver::Resolver;
use scheduler::SchedulerClient;
use table::ServicesTable;

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Address this node advertises for its own entries.
    pub local_addr: String,
    /// Gossip propagation horizon.
    pub max_hops: u32,
    /// Grace period for a fresh instance to send its first heartbeat.
    pub init_timeout: Duration,
    /// Heartbeat window; the sweeper ticks at a third of it.
    pub heartbeat_window: Duration,
    /// Anti-entropy full-table push interval.
    pub gossip_interval: Duration,
    /// Timeout on every outbound HTTP call.
    pub http_timeout: Duration,
    /// Workload-scheduler address for instance teardown notifications.
    pub scheduler_addr: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            local_addr: format!("127.0.0.1:{}", DEFAULT_SERVER_PORT),
            max_hops: 2,
            init_timeout: Duration::from_secs(60),
            heartbeat_window: Duration::from_secs(60),
            gossip_interval: Duration::from_secs(20),
            http_timeout: Duration::from_secs(20),
            scheduler_addr: "127.0.0.1:50001".to_string(),
        }
    }
}

/// One registry node: the merged services table, the gossip protocol around
/// it, heartbeat tracking, neighbor records, and the resolver.
pub struct Registry {
    id: String,
    config: RegistryConfig,
    table: Arc<ServicesTable>,
    heartbeats: Arc<HeartbeatMonitor>,
    neighbors: Arc<NeighborManager>,
    gossip: Arc<GossipProtocol>,
    resolver: Resolver,
    scheduler: Arc<SchedulerClient>,
    /// Grace-period release signals, one per uninitialized instance.
    init_signals: Arc<DashMap<String, oneshot::Sender<()>>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> anyhow::Result<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        info!("registry node id: {}", id);

        let client = Client::builder().timeout(config.http_timeout).build()?;

        let table = Arc::new(ServicesTable::new());
        let neighbors = Arc::new(NeighborManager::new(client.clone()));
        let gossip = Arc::new(GossipProtocol::new(
            id.clone(),
            GossipConfig {
                horizon: config.max_hops,
                ..GossipConfig::default()
            },
            table.clone(),
            neighbors.clone(),
            client.clone(),
        ));
        let scheduler = Arc::new(SchedulerClient::new(client, config.scheduler_addr.clone()));

        Ok(Arc::new(Registry {
            id,
            config,
            resolver: Resolver::new(table.clone()),
            table,
            heartbeats: Arc::new(HeartbeatMonitor::new()),
            neighbors,
            gossip,
            scheduler,
            init_signals: Arc::new(DashMap::new()),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawns the liveness sweeper and the anti-entropy timer.
    pub fn start(self: &Arc<Self>) {
        let registry = self.clone();
        let tick = self.config.heartbeat_window / 3;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                debug!("checking heartbeats");
                registry.sweep_heartbeats().await;
            }
        });

        self.gossip.start_anti_entropy(self.config.gossip_interval);
    }

    async fn sweep_heartbeats(&self) {
        for (service_id, instance_id) in self.heartbeats.sweep() {
            match self.table.delete_instance(&service_id, &instance_id).await {
                Ok(_) => warn!(
                    "instance {} of service {} stopped heartbeating, removed",
                    instance_id, service_id
                ),
                Err(_) => {
                    debug!(
                        "did not find instance {} in service {}, assuming it was already removed",
                        instance_id, service_id
                    );
                    continue;
                }
            }

            self.init_signals.remove(&instance_id);
            self.scheduler.remove_instance(&instance_id).await;
            self.gossip.broadcast_snapshot().await;
        }
    }

    /// Strict service registration: the entry starts as a purely local one
    /// and is announced to the neighbors right away.
    pub async fn register_service(
        &self,
        service_id: &str,
        ports: PortSet,
    ) -> Result<(), RegistryError> {
        let entry = DiscoverEntry {
            host: self.id.clone(),
            host_addr: self.config.local_addr.clone(),
            service: Service {
                id: service_id.to_string(),
                ports,
            },
            instances: HashMap::new(),
            number_of_hops: 0,
            max_hops: 0,
            version: 0,
        };

        if !self.table.add_service(entry).await {
            return Err(RegistryError::ServiceAlreadyExists(service_id.to_string()));
        }

        info!("added service {}", service_id);
        self.gossip.broadcast_snapshot().await;
        Ok(())
    }

    pub async fn delete_service(&self, service_id: &str) -> Result<(), RegistryError> {
        let instance_ids = self
            .table
            .delete_service(service_id)
            .await
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;

        for instance_id in &instance_ids {
            self.heartbeats.remove(instance_id);
            self.init_signals.remove(instance_id);
        }

        info!("deleted service {}", service_id);
        self.gossip.broadcast_snapshot().await;
        Ok(())
    }

    /// Registers an instance under an existing service. Non-static instances
    /// get a grace-period watchdog that evicts them unless a first heartbeat
    /// arrives within the init timeout.
    pub async fn register_instance(
        self: &Arc<Self>,
        service_id: &str,
        instance_id: &str,
        spec: InstanceSpec,
        observed_ip: Option<IpAddr>,
    ) -> Result<(), RegistryError> {
        if self.table.get_service(service_id).await.is_none() {
            return Err(RegistryError::ServiceNotFound(service_id.to_string()));
        }

        let ip = if spec.local {
            instance_id.to_string()
        } else {
            observed_ip
                .map(|ip| ip.to_string())
                .ok_or_else(|| {
                    RegistryError::IllegalArgument("caller address unknown".to_string())
                })?
        };

        let instance = Instance {
            id: instance_id.to_string(),
            service_id: service_id.to_string(),
            ip,
            port_translation: spec.port_translation,
            initialized: spec.is_static,
            is_static: spec.is_static,
            local: spec.local,
        };

        let watchdog = if spec.is_static {
            None
        } else {
            let (tx, rx) = oneshot::channel();
            self.init_signals.insert(instance_id.to_string(), tx);
            Some(rx)
        };

        if let Err(e) = self.table.add_instance(service_id, instance).await {
            self.init_signals.remove(instance_id);
            return Err(e);
        }

        match watchdog {
            Some(rx) => {
                self.spawn_grace_watchdog(service_id.to_string(), instance_id.to_string(), rx);
                debug!("added interactive instance {} to instances waiting for heartbeat", instance_id);
            }
            None => debug!("added static instance {}", instance_id),
        }

        self.gossip.broadcast_snapshot().await;
        Ok(())
    }

    fn spawn_grace_watchdog(
        self: &Arc<Self>,
        service_id: String,
        instance_id: String,
        alive: oneshot::Receiver<()>,
    ) {
        let registry = self.clone();
        let timeout = self.config.init_timeout;

        tokio::spawn(async move {
            tokio::select! {
                result = alive => {
                    match result {
                        Ok(()) => debug!("instance {} is up", instance_id),
                        Err(_) => debug!("instance {} removed before initializing", instance_id),
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    if registry.table.get_service(&service_id).await.is_none() {
                        debug!("service {} was removed meanwhile, ignoring", service_id);
                        return;
                    }

                    if registry
                        .table
                        .delete_instance(&service_id, &instance_id)
                        .await
                        .is_ok()
                    {
                        warn!(
                            "instance {} never reported, deleting it from service {}",
                            instance_id, service_id
                        );
                        registry.heartbeats.remove(&instance_id);
                        registry.init_signals.remove(&instance_id);
                        registry.scheduler.remove_instance(&instance_id).await;
                        registry.gossip.broadcast_snapshot().await;
                    }
                }
            }
        });
    }

    pub async fn delete_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), RegistryError> {
        if self.table.get_service(service_id).await.is_none() {
            return Err(RegistryError::ServiceNotFound(service_id.to_string()));
        }

        self.table.delete_instance(service_id, instance_id).await?;
        self.heartbeats.remove(instance_id);
        // Dropping the sender releases a still-pending watchdog.
        self.init_signals.remove(instance_id);

        self.gossip.broadcast_snapshot().await;
        Ok(())
    }

    /// First-heartbeat registration, strictly insert-if-absent.
    pub fn register_heartbeat(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), RegistryError> {
        if !self.heartbeats.register(service_id, instance_id) {
            return Err(RegistryError::HeartbeatAlreadyRegistered(
                instance_id.to_string(),
            ));
        }
        Ok(())
    }

    /// A heartbeat refreshes the liveness window; the first one also flips
    /// `initialized` and releases the grace-period watchdog.
    pub async fn heartbeat(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        if self.table.get_service(service_id).await.is_none() {
            warn!("ignoring heartbeat since service {} wasn't registered", service_id);
            return Err(RegistryError::ServiceNotFound(service_id.to_string()));
        }

        let instance = self
            .table
            .get_service_instance(service_id, instance_id)
            .await
            .ok_or_else(|| {
                warn!(
                    "ignoring heartbeat from instance {} since it wasn't registered",
                    instance_id
                );
                RegistryError::InstanceNotFound(instance_id.to_string())
            })?;

        if !self.heartbeats.contains(instance_id) {
            return Err(RegistryError::HeartbeatNotRegistered(instance_id.to_string()));
        }

        if !instance.initialized {
            self.table
                .set_instance_initialized(service_id, instance_id)
                .await;
            if let Some((_, tx)) = self.init_signals.remove(instance_id) {
                let _ = tx.send(());
            }
        }

        self.heartbeats.beat(instance_id);
        debug!("got heartbeat from instance {}", instance_id);
        Ok(())
    }

    pub async fn resolve(
        &self,
        host: &str,
        port: &crate::model::registry::Port,
    ) -> Option<(String, String)> {
        self.resolver.resolve(host, port).await
    }

    /// Handshakes with the registry at `addr`, stores the neighbor record and
    /// pushes it the full table.
    pub async fn add_neighbor(&self, addr: &str) -> Result<(), RegistryError> {
        let neighbor_id = self.neighbors.handshake(addr).await?;
        if neighbor_id == self.id {
            return Err(RegistryError::IllegalArgument(
                "cannot add this node as its own neighbor".to_string(),
            ));
        }

        let neighbor = Neighbor {
            id: neighbor_id,
            addr: addr.to_string(),
        };
        self.neighbors.insert(neighbor.clone());
        self.gossip.send_snapshot_to(&neighbor).await;
        Ok(())
    }

    /// Drops every service contributed by a departed neighbor.
    pub async fn delete_neighbor_services(&self, neighbor_id: &str) {
        self.neighbors.remove(neighbor_id);
        for instance_id in self.table.delete_origin_services(neighbor_id).await {
            self.heartbeats.remove(&instance_id);
            self.init_signals.remove(&instance_id);
        }
    }

    /// Gossip ingress; see [`GossipProtocol::ingest`].
    pub async fn ingest_discover(&self, peer_ip: Option<IpAddr>, msg: DiscoverMessage) -> bool {
        self.gossip.ingest(peer_ip, msg).await
    }

    pub async fn get_all_services(&self) -> HashMap<String, Service> {
        self.table.get_all_services().await
    }

    pub async fn get_service_instances(
        &self,
        service_id: &str,
    ) -> Option<(PortSet, HashMap<String, Instance>)> {
        self.table.get_all_service_instances(service_id).await
    }

    pub async fn get_service_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Option<Instance> {
        self.table.get_service_instance(service_id, instance_id).await
    }

    /// Global instance lookup together with its service's port set.
    pub async fn get_instance(&self, instance_id: &str) -> Option<(PortSet, Instance)> {
        let instance = self.table.get_instance(instance_id)?;
        let service = self.table.get_service(&instance.service_id).await?;
        Some((service.ports, instance))
    }

    pub async fn table_snapshot(&self) -> HashMap<String, DiscoverEntry> {
        self.table.snapshot_entries().await
    }
}
