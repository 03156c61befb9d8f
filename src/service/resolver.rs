// Name resolution
// Maps a (host, port) request onto a concrete (ip, host-port): the host is
// tried as a serviceId first (uniform-random instance pick), then as an
// instanceId. Stale entries are the sweeper's problem, not the resolver's.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::model::registry::{Instance, Port};
use crate::service::table::ServicesTable;

pub struct Resolver {
    table: Arc<ServicesTable>,
}

impl Resolver {
    pub fn new(table: Arc<ServicesTable>) -> Self {
        Resolver { table }
    }

    /// Resolves `(host, port)` to `(host, port)` strings, or `None` when the
    /// target is unknown or the port has no translation.
    pub async fn resolve(&self, host: &str, port: &Port) -> Option<(String, String)> {
        if let Some((_, instances)) = self.table.get_all_service_instances(host).await {
            let candidates: Vec<Instance> = instances.into_values().collect();
            let instance = candidates.choose(&mut rand::thread_rng())?.clone();
            return Self::resolve_endpoint(&instance, port);
        }

        if let Some(instance) = self.table.get_instance(host) {
            return Self::resolve_endpoint(&instance, port);
        }

        debug!("could not resolve {}:{}", host, port);
        None
    }

    fn resolve_endpoint(instance: &Instance, port: &Port) -> Option<(String, String)> {
        // A local instance stands in as its own host and keeps the logical
        // port number.
        if instance.local {
            return Some((instance.id.clone(), port.number().to_string()));
        }

        let bindings = instance.port_translation.get(port)?;
        let binding = bindings.first()?;
        Some((instance.ip.clone(), binding.host_port.clone()))
    }
}
