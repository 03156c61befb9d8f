pub mod gossip; // Discover ingress, neighbor join, who, table
pub mod model; // Wire types
pub mod resolve; // Name resolution
pub mod route; // Route configuration
pub mod services; // Service and instance lifecycle
