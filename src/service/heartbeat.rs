// Instance liveness tracking
// Each non-static instance owns a heartbeat record whose `is_up` flag is set
// by incoming beats and cleared at every sweep; a record found down at sweep
// time means no beat arrived in the preceding window and the instance is
// evicted.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

/// Per-instance liveness record.
pub struct HeartbeatRecord {
    pub service_id: String,
    is_up: Mutex<bool>,
}

impl HeartbeatRecord {
    fn new(service_id: &str) -> Self {
        HeartbeatRecord {
            service_id: service_id.to_string(),
            is_up: Mutex::new(true),
        }
    }

    pub fn mark_up(&self) {
        let mut is_up = self.is_up.lock().unwrap_or_else(|e| e.into_inner());
        *is_up = true;
    }

    /// Clears the window flag, returning whether a beat had arrived since the
    /// previous sweep.
    fn reset_window(&self) -> bool {
        let mut is_up = self.is_up.lock().unwrap_or_else(|e| e.into_inner());
        let was_up = *is_up;
        *is_up = false;
        was_up
    }
}

/// The heartbeat map and its sweep pass. The owning registry drives the
/// sweep loop and performs the actual table eviction.
pub struct HeartbeatMonitor {
    records: DashMap<String, Arc<HeartbeatRecord>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        HeartbeatMonitor {
            records: DashMap::new(),
        }
    }

    /// Strict insert of a first-heartbeat registration. Returns `false` when
    /// a record already exists.
    pub fn register(&self, service_id: &str, instance_id: &str) -> bool {
        if self.records.contains_key(instance_id) {
            return false;
        }
        self.records
            .insert(instance_id.to_string(), Arc::new(HeartbeatRecord::new(service_id)));
        debug!(
            "registered service {} instance {} first heartbeat",
            service_id, instance_id
        );
        true
    }

    /// Records a beat. Returns `false` when the instance has no record.
    pub fn beat(&self, instance_id: &str) -> bool {
        match self.records.get(instance_id) {
            Some(record) => {
                record.mark_up();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.records.contains_key(instance_id)
    }

    pub fn remove(&self, instance_id: &str) {
        self.records.remove(instance_id);
    }

    /// One sweep pass: instances whose flag is still down are expired and
    /// dropped from the map; the rest get their window reset. Returns the
    /// `(service_id, instance_id)` pairs to evict.
    pub fn sweep(&self) -> Vec<(String, String)> {
        let mut expired = Vec::new();

        for entry in self.records.iter() {
            if !entry.value().reset_window() {
                expired.push((entry.value().service_id.clone(), entry.key().clone()));
            }
        }

        for (_, instance_id) in &expired {
            debug!("removing instance {} from expected heartbeats", instance_id);
            self.records.remove(instance_id);
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}
