pub mod common; // Application state and configuration
pub mod registry; // Domain entities
