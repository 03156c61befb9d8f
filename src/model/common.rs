// Shared application state and configuration access
// Configuration values come from conf/application.yml (plus CLI overrides)
// and are read through typed getters with defaults.

use std::sync::Arc;
use std::time::Duration;

use config::Config;

use crate::service::{Registry, RegistryConfig};

pub const DEFAULT_SERVER_PORT: u16 = 50000;

const MAX_HOPS_PROPERTY: &str = "registry.maxHops";
const INIT_TIMEOUT_PROPERTY: &str = "registry.initTimeoutSeconds";
const HEARTBEAT_WINDOW_PROPERTY: &str = "registry.heartbeatWindowSeconds";
const GOSSIP_INTERVAL_PROPERTY: &str = "registry.gossipIntervalSeconds";
const HTTP_CLIENT_TIMEOUT_PROPERTY: &str = "registry.httpClientTimeoutSeconds";
const SCHEDULER_ADDR_PROPERTY: &str = "scheduler.addr";

#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub app_config: Config,
}

impl Configuration {
    pub fn new(app_config: Config) -> Self {
        Configuration { app_config }
    }

    pub fn server_address(&self) -> String {
        self.app_config
            .get_string("server.address")
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.app_config
            .get_int("server.port")
            .unwrap_or(DEFAULT_SERVER_PORT as i64) as u16
    }

    pub fn max_hops(&self) -> u32 {
        self.app_config.get_int(MAX_HOPS_PROPERTY).unwrap_or(2) as u32
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.app_config.get_int(INIT_TIMEOUT_PROPERTY).unwrap_or(60) as u64)
    }

    pub fn heartbeat_window(&self) -> Duration {
        Duration::from_secs(
            self.app_config
                .get_int(HEARTBEAT_WINDOW_PROPERTY)
                .unwrap_or(60) as u64,
        )
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(
            self.app_config
                .get_int(GOSSIP_INTERVAL_PROPERTY)
                .unwrap_or(20) as u64,
        )
    }

    pub fn http_client_timeout(&self) -> Duration {
        Duration::from_secs(
            self.app_config
                .get_int(HTTP_CLIENT_TIMEOUT_PROPERTY)
                .unwrap_or(20) as u64,
        )
    }

    pub fn scheduler_addr(&self) -> String {
        self.app_config
            .get_string(SCHEDULER_ADDR_PROPERTY)
            .unwrap_or("127.0.0.1:50001".to_string())
    }

    /// The registry configuration derived from this file, advertising
    /// `advertised_ip` (the first non-loopback interface when `None`).
    pub fn registry_config(&self, advertised_ip: Option<std::net::IpAddr>) -> RegistryConfig {
        let ip = advertised_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        RegistryConfig {
            local_addr: format!("{}:{}", ip, self.server_port()),
            max_hops: self.max_hops(),
            init_timeout: self.init_timeout(),
            heartbeat_window: self.heartbeat_window(),
            gossip_interval: self.gossip_interval(),
            http_timeout: self.http_client_timeout(),
            scheduler_addr: self.scheduler_addr(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub configuration: Configuration,
    pub registry: Arc<Registry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_defaults() {
        let configuration = Configuration::default();

        assert_eq!(configuration.server_port(), 50000);
        assert_eq!(configuration.max_hops(), 2);
        assert_eq!(configuration.init_timeout(), Duration::from_secs(60));
        assert_eq!(configuration.heartbeat_window(), Duration::from_secs(60));
        assert_eq!(configuration.http_client_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_configuration_overrides() {
        let app_config = Config::builder()
            .set_override("server.port", 50100)
            .unwrap()
            .set_override("registry.maxHops", 4)
            .unwrap()
            .build()
            .unwrap();
        let configuration = Configuration::new(app_config);

        assert_eq!(configuration.server_port(), 50100);
        assert_eq!(configuration.max_hops(), 4);

        let registry_config = configuration.registry_config(None);
        assert_eq!(registry_config.local_addr, "127.0.0.1:50100");
        assert_eq!(registry_config.max_hops, 4);
    }
}
