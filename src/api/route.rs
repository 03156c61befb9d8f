// Registry HTTP route configuration
// Everything lives under the /archimedes prefix.

use actix_web::web;

use super::{gossip, resolve, services};

/// All registry routes:
/// - POST/DELETE /services/{serviceId} - register / delete a service
/// - GET /services - list services
/// - GET /services/{serviceId} - list a service's instances
/// - POST/DELETE/PUT /services/{serviceId}/{instanceId} - register / delete /
///   heartbeat (or `?status=` state change) an instance
/// - POST /services/{serviceId}/{instanceId}/alive - first-heartbeat registration
/// - GET /services/{serviceId}/{instanceId}, GET /instances/{instanceId}
/// - POST /discover, POST /neighbor, GET /who, GET /table, POST /resolve
pub fn routes() -> actix_web::Scope {
    web::scope("/archimedes")
        .service(services::get_all_services)
        .service(services::register_service)
        .service(services::delete_service)
        .service(services::get_all_service_instances)
        .service(services::register_service_instance)
        .service(services::delete_service_instance)
        .service(services::heartbeat_service_instance)
        .service(services::register_heartbeat)
        .service(services::get_service_instance)
        .service(services::get_instance)
        .service(gossip::discover)
        .service(gossip::add_neighbor)
        .service(gossip::who_are_you)
        .service(gossip::get_table)
        .service(resolve::resolve)
}
