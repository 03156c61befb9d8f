// Workload-scheduler notification client
// The registry tells the external scheduler to tear down instances that
// failed their grace period or stopped heartbeating. Failures are logged and
// suppressed; heartbeats, not retries, are the recovery mechanism.

use reqwest::Client;
use tracing::{debug, warn};

pub struct SchedulerClient {
    client: Client,
    addr: String,
}

impl SchedulerClient {
    pub fn new(client: Client, addr: String) -> Self {
        SchedulerClient { client, addr }
    }

    /// `DELETE /instances/{id}` toward the scheduler. A non-2xx reply or a
    /// transport failure is logged, never escalated.
    pub async fn remove_instance(&self, instance_id: &str) {
        let url = format!("http://{}/instances/{}", self.addr, instance_id);
        debug!("warning scheduler to remove instance {}", instance_id);

        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    "scheduler returned status {} while removing instance {}",
                    response.status(),
                    instance_id
                );
            }
            Err(e) => {
                warn!(
                    "failed to reach scheduler while removing instance {}: {}",
                    instance_id, e
                );
            }
        }
    }
}
