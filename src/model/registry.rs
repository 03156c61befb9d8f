// Domain entities for the services registry
// Services expose a set of logical ports; instances back a service and map
// logical ports onto concrete host bindings.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A logical port in the industry-standard `"<number>/<proto>"` form,
/// e.g. `"8080/tcp"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(String);

impl Port {
    pub fn new(number: u16, proto: &str) -> Self {
        Port(format!("{}/{}", number, proto))
    }

    pub fn tcp(number: u16) -> Self {
        Port::new(number, "tcp")
    }

    /// The numeric part, without the protocol suffix.
    pub fn number(&self) -> &str {
        match self.0.split_once('/') {
            Some((number, _)) => number,
            None => &self.0,
        }
    }

    pub fn proto(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, proto)) => proto,
            None => "tcp",
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Port {
    fn from(value: &str) -> Self {
        Port(value.to_string())
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-port options in a service's port set. Currently carries nothing and
/// serializes as `{}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSettings {}

/// The set of logical ports a service exposes.
pub type PortSet = HashMap<Port, PortSettings>;

/// Mapping from a logical port to its concrete host bindings. The first
/// binding is the one handed out on resolution.
pub type PortMap = HashMap<Port, Vec<PortBinding>>;

/// One concrete binding of a logical port on an instance's host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// A named collection of interchangeable instances exposing a common set of
/// ports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub ports: PortSet,
}

/// One running endpoint providing a service.
///
/// A `local` instance resolves to its own id instead of a translated host.
/// A `static` instance has assumed liveness: no grace-period watchdog and no
/// heartbeat tracking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub service_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port_translation: PortMap,
    #[serde(default)]
    pub initialized: bool,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    #[serde(default)]
    pub local: bool,
}

/// A directly connected peer registry, keyed by the opaque node id learned
/// through the who-are-you handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub addr: String,
}
