// Distributed services table
// Concurrent mapping serviceId -> entry with a per-entry read/write lock,
// a global instanceId index, and an origin index used to clear a departed
// neighbor's contributions in one operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::api::model::{DiscoverEntry, DiscoverMessage};
use crate::error::RegistryError;
use crate::model::registry::{Instance, PortSet, Service};

/// One services-table entry. Content mutation is serialized by the entry's
/// own lock; structural changes (insert/remove of whole entries) go through
/// the table.
pub struct ServiceEntry {
    state: RwLock<EntryState>,
}

struct EntryState {
    host: String,
    host_addr: String,
    service: Service,
    instances: HashMap<String, Instance>,
    number_of_hops: u32,
    max_hops: u32,
    version: u64,
}

impl ServiceEntry {
    fn from_discover(entry: DiscoverEntry) -> Self {
        ServiceEntry {
            state: RwLock::new(EntryState {
                host: entry.host,
                host_addr: entry.host_addr,
                service: entry.service,
                instances: entry.instances,
                number_of_hops: entry.number_of_hops,
                max_hops: entry.max_hops,
                version: entry.version,
            }),
        }
    }
}

impl EntryState {
    fn to_discover(&self) -> DiscoverEntry {
        DiscoverEntry {
            host: self.host.clone(),
            host_addr: self.host_addr.clone(),
            service: self.service.clone(),
            instances: self.instances.clone(),
            number_of_hops: self.number_of_hops,
            max_hops: self.max_hops,
            version: self.version,
        }
    }
}

/// The merged view of every service seen in the network, local and gossiped.
pub struct ServicesTable {
    services: DashMap<String, Arc<ServiceEntry>>,
    /// Global instanceId -> Instance index, kept in sync by every mutation
    /// path so resolution never has to walk the entries.
    instances: DashMap<String, Instance>,
    /// Origin node id -> serviceIds it contributed.
    origin_services: DashMap<String, HashSet<String>>,
    /// Serializes the insert-if-absent path so two creators cannot race to
    /// populate the same serviceId.
    add_lock: Mutex<()>,
}

impl ServicesTable {
    pub fn new() -> Self {
        ServicesTable {
            services: DashMap::new(),
            instances: DashMap::new(),
            origin_services: DashMap::new(),
            add_lock: Mutex::new(()),
        }
    }

    /// Strict insert of a new entry. Returns `false` if the serviceId is
    /// already present.
    pub async fn add_service(&self, entry: DiscoverEntry) -> bool {
        let service_id = entry.service.id.clone();

        if self.services.contains_key(&service_id) {
            return false;
        }

        let _guard = self.add_lock.lock().await;
        if self.services.contains_key(&service_id) {
            return false;
        }

        for (instance_id, instance) in &entry.instances {
            self.instances.insert(instance_id.clone(), instance.clone());
        }
        self.origin_services
            .entry(entry.host.clone())
            .or_default()
            .insert(service_id.clone());

        debug!("added service {} originated by {}", service_id, entry.host);
        self.services
            .insert(service_id, Arc::new(ServiceEntry::from_discover(entry)));
        true
    }

    /// Version-gated replace of an existing entry. Entries at or below the
    /// current version are rejected, so applying the same message twice is a
    /// no-op and the first write wins a same-version race.
    pub async fn update_service(&self, incoming: DiscoverEntry) -> bool {
        let service_id = incoming.service.id.clone();
        let entry = match self.services.get(&service_id) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };

        {
            let state = entry.state.read().await;
            if incoming.version <= state.version {
                debug!(
                    "discarding update for {} (version {} <= {})",
                    service_id, incoming.version, state.version
                );
                return false;
            }
        }

        let mut state = entry.state.write().await;
        // The read lock was released before the write acquisition; re-check so
        // a concurrent writer that got in first still wins.
        if incoming.version <= state.version {
            return false;
        }

        // Reconcile the global index: instances dropped by the new revision
        // disappear, new ones appear.
        for instance_id in state.instances.keys() {
            if !incoming.instances.contains_key(instance_id) {
                self.instances.remove(instance_id);
            }
        }
        for (instance_id, instance) in &incoming.instances {
            self.instances.insert(instance_id.clone(), instance.clone());
        }

        if state.host != incoming.host {
            if let Some(mut old) = self.origin_services.get_mut(&state.host) {
                old.remove(&service_id);
            }
            self.origin_services
                .entry(incoming.host.clone())
                .or_default()
                .insert(service_id.clone());
        }

        debug!(
            "updated service {} to version {} ({} hops)",
            service_id, incoming.version, incoming.number_of_hops
        );

        state.host = incoming.host;
        state.host_addr = incoming.host_addr;
        state.service = incoming.service;
        state.instances = incoming.instances;
        state.number_of_hops = incoming.number_of_hops;
        state.max_hops = incoming.max_hops;
        state.version = incoming.version;
        true
    }

    /// Removes a service and drains its instances from the global index.
    /// Returns the removed instance ids so the owner can clear heartbeat and
    /// watchdog state, or `None` if the service was unknown.
    pub async fn delete_service(&self, service_id: &str) -> Option<Vec<String>> {
        let (_, entry) = self.services.remove(service_id)?;
        let mut state = entry.state.write().await;

        let instance_ids: Vec<String> = state.instances.keys().cloned().collect();
        for instance_id in &instance_ids {
            self.instances.remove(instance_id);
        }
        state.instances.clear();

        if let Some(mut contributed) = self.origin_services.get_mut(&state.host) {
            contributed.remove(service_id);
        }

        debug!("deleted service {}", service_id);
        Some(instance_ids)
    }

    pub async fn get_service(&self, service_id: &str) -> Option<Service> {
        let entry = self.services.get(service_id)?.value().clone();
        let state = entry.state.read().await;
        Some(state.service.clone())
    }

    pub async fn get_all_services(&self) -> HashMap<String, Service> {
        let entries: Vec<Arc<ServiceEntry>> =
            self.services.iter().map(|e| e.value().clone()).collect();

        let mut services = HashMap::with_capacity(entries.len());
        for entry in entries {
            let state = entry.state.read().await;
            services.insert(state.service.id.clone(), state.service.clone());
        }
        services
    }

    /// Adds an instance to an existing service and bumps the entry version so
    /// the change wins version-gated merges on peers.
    pub async fn add_instance(
        &self,
        service_id: &str,
        instance: Instance,
    ) -> Result<(), RegistryError> {
        let entry = match self.services.get(service_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(RegistryError::ServiceNotFound(service_id.to_string())),
        };

        let mut state = entry.state.write().await;
        if state.instances.contains_key(&instance.id) {
            return Err(RegistryError::InstanceAlreadyRegistered(instance.id));
        }

        self.instances.insert(instance.id.clone(), instance.clone());
        state.instances.insert(instance.id.clone(), instance);
        state.version += 1;
        Ok(())
    }

    /// Removes an instance from its service entry, then from the global
    /// index, and bumps the entry version.
    pub async fn delete_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<Instance, RegistryError> {
        let entry = match self.services.get(service_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(RegistryError::ServiceNotFound(service_id.to_string())),
        };

        let mut state = entry.state.write().await;
        let instance = state
            .instances
            .remove(instance_id)
            .ok_or_else(|| RegistryError::InstanceNotFound(instance_id.to_string()))?;
        self.instances.remove(instance_id);
        state.version += 1;

        debug!("deleted instance {} from service {}", instance_id, service_id);
        Ok(instance)
    }

    pub async fn get_service_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Option<Instance> {
        let entry = self.services.get(service_id)?.value().clone();
        let state = entry.state.read().await;
        state.instances.get(instance_id).cloned()
    }

    pub async fn service_has_instance(&self, service_id: &str, instance_id: &str) -> bool {
        self.get_service_instance(service_id, instance_id)
            .await
            .is_some()
    }

    pub async fn get_all_service_instances(
        &self,
        service_id: &str,
    ) -> Option<(PortSet, HashMap<String, Instance>)> {
        let entry = self.services.get(service_id)?.value().clone();
        let state = entry.state.read().await;
        Some((state.service.ports.clone(), state.instances.clone()))
    }

    /// Global lookup by instance id alone.
    pub fn get_instance(&self, instance_id: &str) -> Option<Instance> {
        self.instances.get(instance_id).map(|i| i.value().clone())
    }

    /// Flips `initialized` on an instance, both in its entry and in the
    /// global index. Returns `false` if the instance is unknown.
    pub async fn set_instance_initialized(&self, service_id: &str, instance_id: &str) -> bool {
        let entry = match self.services.get(service_id) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };

        let mut state = entry.state.write().await;
        match state.instances.get_mut(instance_id) {
            Some(instance) => {
                instance.initialized = true;
                self.instances
                    .insert(instance_id.to_string(), instance.clone());
                true
            }
            None => false,
        }
    }

    /// Merges a discover message into the table. Entries originated by the
    /// local node are ignored. Returns whether any entry changed, so callers
    /// can decide to re-broadcast.
    pub async fn update_table_with_discover_message(
        &self,
        local_id: &str,
        msg: &DiscoverMessage,
    ) -> bool {
        let mut changed = false;

        for (service_id, entry) in &msg.entries {
            if entry.host == local_id {
                debug!("ignoring own entry for {} in message {}", service_id, msg.message_id);
                continue;
            }

            let applied = if self.services.contains_key(service_id) {
                self.update_service(entry.clone()).await
            } else if self.add_service(entry.clone()).await {
                true
            } else {
                // Lost the insert race; fall back to the update path.
                self.update_service(entry.clone()).await
            };

            changed |= applied;
        }

        changed
    }

    /// Builds a full-table snapshot with a fresh message id, or `None` when
    /// the table is empty. Entries originated by the local node leave with
    /// the configured horizon as their TTL.
    pub async fn to_discover_msg(&self, local_id: &str, horizon: u32) -> Option<DiscoverMessage> {
        let snapshots: Vec<(String, Arc<ServiceEntry>)> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        if snapshots.is_empty() {
            return None;
        }

        let mut entries = HashMap::with_capacity(snapshots.len());
        for (service_id, entry) in snapshots {
            let state = entry.state.read().await;
            let mut snapshot = state.to_discover();
            if snapshot.host == local_id {
                snapshot.max_hops = horizon;
            }
            entries.insert(service_id, snapshot);
        }

        Some(DiscoverMessage {
            message_id: Uuid::new_v4(),
            origin: local_id.to_string(),
            neighbor_sent: local_id.to_string(),
            entries,
        })
    }

    /// A plain snapshot of every entry, for the table inspection endpoint.
    pub async fn snapshot_entries(&self) -> HashMap<String, DiscoverEntry> {
        let snapshots: Vec<(String, Arc<ServiceEntry>)> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut entries = HashMap::with_capacity(snapshots.len());
        for (service_id, entry) in snapshots {
            let state = entry.state.read().await;
            entries.insert(service_id, state.to_discover());
        }
        entries
    }

    /// Drops every service a departed origin contributed. Returns the ids of
    /// all instances that went with them.
    pub async fn delete_origin_services(&self, origin: &str) -> Vec<String> {
        let service_ids: Vec<String> = match self.origin_services.remove(origin) {
            Some((_, ids)) => ids.into_iter().collect(),
            None => return Vec::new(),
        };

        let mut removed = Vec::new();
        for service_id in service_ids {
            if let Some(instance_ids) = self.delete_service(&service_id).await {
                removed.extend(instance_ids);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServicesTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::registry::{Port, PortBinding, PortSettings};

    fn create_test_entry(service_id: &str, host: &str, version: u64) -> DiscoverEntry {
        let mut ports = PortSet::new();
        ports.insert(Port::tcp(8080), PortSettings::default());

        DiscoverEntry {
            host: host.to_string(),
            host_addr: format!("{}:50000", host),
            service: Service {
                id: service_id.to_string(),
                ports,
            },
            instances: HashMap::new(),
            number_of_hops: 1,
            max_hops: 2,
            version,
        }
    }

    fn create_test_instance(service_id: &str, instance_id: &str) -> Instance {
        let mut translation = HashMap::new();
        translation.insert(
            Port::tcp(8080),
            vec![PortBinding {
                host_ip: String::new(),
                host_port: "32001".to_string(),
            }],
        );

        Instance {
            id: instance_id.to_string(),
            service_id: service_id.to_string(),
            ip: "10.0.0.7".to_string(),
            port_translation: translation,
            initialized: false,
            is_static: false,
            local: false,
        }
    }

    #[tokio::test]
    async fn test_add_service_strict_insert() {
        let table = ServicesTable::new();

        assert!(table.add_service(create_test_entry("svcA", "node-1", 0)).await);
        assert!(!table.add_service(create_test_entry("svcA", "node-1", 0)).await);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_add_service_publishes_instances() {
        let table = ServicesTable::new();

        let mut entry = create_test_entry("svcA", "node-1", 0);
        entry
            .instances
            .insert("i1".to_string(), create_test_instance("svcA", "i1"));

        assert!(table.add_service(entry).await);
        assert!(table.get_instance("i1").is_some());
        assert!(table.service_has_instance("svcA", "i1").await);
    }

    #[tokio::test]
    async fn test_update_service_rejects_stale_versions() {
        let table = ServicesTable::new();
        table.add_service(create_test_entry("svcA", "node-1", 3)).await;

        assert!(!table.update_service(create_test_entry("svcA", "node-1", 2)).await);
        assert!(!table.update_service(create_test_entry("svcA", "node-1", 3)).await);
        assert!(table.update_service(create_test_entry("svcA", "node-1", 4)).await);

        let snapshot = table.snapshot_entries().await;
        assert_eq!(snapshot["svcA"].version, 4);
    }

    #[tokio::test]
    async fn test_update_service_reconciles_instances() {
        let table = ServicesTable::new();

        let mut entry = create_test_entry("svcA", "node-1", 1);
        entry
            .instances
            .insert("i1".to_string(), create_test_instance("svcA", "i1"));
        table.add_service(entry).await;

        let mut update = create_test_entry("svcA", "node-1", 2);
        update
            .instances
            .insert("i2".to_string(), create_test_instance("svcA", "i2"));
        assert!(table.update_service(update).await);

        assert!(table.get_instance("i1").is_none());
        assert!(table.get_instance("i2").is_some());
        assert!(!table.service_has_instance("svcA", "i1").await);
    }

    #[tokio::test]
    async fn test_delete_service_clears_global_index() {
        let table = ServicesTable::new();

        let mut entry = create_test_entry("svcA", "node-1", 0);
        entry
            .instances
            .insert("i1".to_string(), create_test_instance("svcA", "i1"));
        table.add_service(entry).await;

        let removed = table.delete_service("svcA").await.unwrap();
        assert_eq!(removed, vec!["i1".to_string()]);
        assert!(table.get_instance("i1").is_none());
        assert!(table.get_service("svcA").await.is_none());

        assert!(table.delete_service("svcA").await.is_none());
    }

    #[tokio::test]
    async fn test_add_and_delete_instance_bump_version() {
        let table = ServicesTable::new();
        table.add_service(create_test_entry("svcA", "node-1", 0)).await;

        table
            .add_instance("svcA", create_test_instance("svcA", "i1"))
            .await
            .unwrap();
        assert_eq!(table.snapshot_entries().await["svcA"].version, 1);

        let err = table
            .add_instance("svcA", create_test_instance("svcA", "i1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InstanceAlreadyRegistered(_)));

        table.delete_instance("svcA", "i1").await.unwrap();
        assert_eq!(table.snapshot_entries().await["svcA"].version, 2);
        assert!(table.get_instance("i1").is_none());

        let err = table.delete_instance("svcA", "i1").await.unwrap_err();
        assert!(matches!(err, RegistryError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_discover_merge_ignores_own_entries() {
        let table = ServicesTable::new();

        let mut entries = HashMap::new();
        entries.insert("svcA".to_string(), create_test_entry("svcA", "node-1", 0));
        entries.insert("svcB".to_string(), create_test_entry("svcB", "node-2", 0));
        let msg = DiscoverMessage {
            message_id: Uuid::new_v4(),
            origin: "node-2".to_string(),
            neighbor_sent: "node-2".to_string(),
            entries,
        };

        assert!(table.update_table_with_discover_message("node-1", &msg).await);
        assert!(table.get_service("svcA").await.is_none());
        assert!(table.get_service("svcB").await.is_some());
    }

    #[tokio::test]
    async fn test_discover_merge_is_idempotent() {
        let table = ServicesTable::new();

        let mut entries = HashMap::new();
        let mut entry = create_test_entry("svcB", "node-2", 1);
        entry
            .instances
            .insert("i1".to_string(), create_test_instance("svcB", "i1"));
        entries.insert("svcB".to_string(), entry);
        let msg = DiscoverMessage {
            message_id: Uuid::new_v4(),
            origin: "node-2".to_string(),
            neighbor_sent: "node-2".to_string(),
            entries,
        };

        assert!(table.update_table_with_discover_message("node-1", &msg).await);
        let first = table.snapshot_entries().await;

        assert!(!table.update_table_with_discover_message("node-1", &msg).await);
        let second = table.snapshot_entries().await;
        assert_eq!(first["svcB"], second["svcB"]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_reproduces_service_set() {
        let origin = ServicesTable::new();
        origin.add_service(create_test_entry("svcA", "node-1", 0)).await;
        origin
            .add_instance("svcA", create_test_instance("svcA", "i1"))
            .await
            .unwrap();

        let msg = origin.to_discover_msg("node-1", 2).await.unwrap();
        assert_eq!(msg.entries["svcA"].max_hops, 2);

        let peer = ServicesTable::new();
        assert!(peer.update_table_with_discover_message("node-2", &msg).await);

        assert_eq!(
            peer.get_service("svcA").await.unwrap(),
            origin.get_service("svcA").await.unwrap()
        );
        assert!(peer.get_instance("i1").is_some());
    }

    #[tokio::test]
    async fn test_to_discover_msg_empty_table() {
        let table = ServicesTable::new();
        assert!(table.to_discover_msg("node-1", 2).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_origin_services() {
        let table = ServicesTable::new();

        let mut entry = create_test_entry("svcB", "node-2", 0);
        entry
            .instances
            .insert("i1".to_string(), create_test_instance("svcB", "i1"));
        table.add_service(entry).await;
        table.add_service(create_test_entry("svcC", "node-2", 0)).await;
        table.add_service(create_test_entry("svcA", "node-1", 0)).await;

        let removed = table.delete_origin_services("node-2").await;
        assert_eq!(removed, vec!["i1".to_string()]);
        assert_eq!(table.len(), 1);
        assert!(table.get_service("svcA").await.is_some());
    }
}
