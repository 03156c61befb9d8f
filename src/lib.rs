// Main library module for Archimedes - a peer-to-peer service discovery and
// name resolution registry. Nodes register local services and instances,
// flood that knowledge to neighbor registries with hop-bounded gossip, track
// instance liveness through heartbeats and resolve (host, port) requests
// against the merged view.

use std::net::IpAddr;

use if_addrs::get_if_addrs;

// Module declarations
pub mod api; // HTTP handlers and wire types
pub mod client; // Instance-side heartbeat and resolution utilities
pub mod error; // Error handling and types
pub mod model; // Data models and configuration
pub mod service; // Registry business logic

/// First non-loopback IPv4 of this host, used as the advertised registry
/// address when none is configured.
pub fn local_ipv4() -> Option<IpAddr> {
    get_if_addrs()
        .ok()?
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip())
}
