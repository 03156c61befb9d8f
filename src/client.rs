// Instance-side registry utilities
// A service instance announces itself alive and then keeps beating at a
// third of the liveness window; identity comes from the SERVICE and INSTANCE
// environment variables. Also carries the resolve helper other components
// use to turn a service name into a concrete endpoint.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::api::model::{ResolveReply, ResolveRequest};
use crate::model::registry::Port;

pub const SERVICE_ENV_VAR: &str = "SERVICE";
pub const INSTANCE_ENV_VAR: &str = "INSTANCE";

const HEARTBEAT_WINDOW: Duration = Duration::from_secs(60);

/// Client of one registry node.
pub struct RegistryClient {
    client: Client,
    addr: String,
}

impl RegistryClient {
    pub fn new(addr: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(RegistryClient {
            client,
            addr: addr.to_string(),
        })
    }

    /// Registers this instance's heartbeat and then beats forever at a third
    /// of the liveness window. A 409 on registration means another sender is
    /// already beating for this instance.
    pub async fn send_heartbeats(&self) -> anyhow::Result<()> {
        let service_id =
            std::env::var(SERVICE_ENV_VAR).context("SERVICE environment variable not set")?;
        let instance_id =
            std::env::var(INSTANCE_ENV_VAR).context("INSTANCE environment variable not set")?;

        let alive_url = format!(
            "http://{}/archimedes/services/{}/{}/alive",
            self.addr, service_id, instance_id
        );
        let response = self.client.post(&alive_url).send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::CONFLICT => {
                debug!(
                    "service {} instance {} already has a heartbeat sender",
                    service_id, instance_id
                );
                return Ok(());
            }
            status => bail!("received unexpected status {} registering heartbeat", status),
        }

        let beat_url = format!(
            "http://{}/archimedes/services/{}/{}",
            self.addr, service_id, instance_id
        );
        let mut ticker = tokio::time::interval(HEARTBEAT_WINDOW / 3);

        loop {
            ticker.tick().await;

            let response = self.client.put(&beat_url).send().await?;
            match response.status() {
                StatusCode::OK => debug!("sent heartbeat for instance {}", instance_id),
                StatusCode::NOT_FOUND => warn!("heartbeat to registry returned not found"),
                status => bail!("received unexpected status {} on heartbeat", status),
            }
        }
    }

    /// Resolves `(host, port)` through the registry. `None` means the
    /// registry knows no such target.
    pub async fn resolve(&self, host: &str, port: Port) -> anyhow::Result<Option<(String, String)>> {
        let url = format!("http://{}/archimedes/resolve", self.addr);

        let response = self
            .client
            .post(&url)
            .json(&ResolveRequest {
                host: host.to_string(),
                port,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let reply: ResolveReply = response.json().await?;
                debug!("resolved {} to {}:{}", host, reply.host, reply.port);
                Ok(Some((reply.host, reply.port)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => bail!("got status {} while resolving {}", status, host),
        }
    }
}
