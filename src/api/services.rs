// Service and instance lifecycle handlers
// Local mutations of the services table: registration, deletion, heartbeats
// and the inspection endpoints.

use std::collections::HashMap;

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::debug;

use crate::api::model::{
    InstanceReply, InstanceSpec, ServiceInstancesReply, ServiceSpec, STATUS_OUT_OF_SERVICE,
    STATUS_UP,
};
use crate::error::{AppError, RegistryError};
use crate::model::common::AppState;

#[post("/services/{serviceId}")]
pub async fn register_service(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ServiceSpec>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in register_service handler");

    let service_id = path.into_inner();
    data.registry
        .register_service(&service_id, body.into_inner().ports)
        .await?;

    Ok(HttpResponse::Ok().finish())
}

#[delete("/services/{serviceId}")]
pub async fn delete_service(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in delete_service handler");

    let service_id = path.into_inner();
    data.registry.delete_service(&service_id).await?;

    Ok(HttpResponse::Ok().finish())
}

#[get("/services")]
pub async fn get_all_services(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    debug!("handling request in get_all_services handler");

    let services: HashMap<String, ServiceSpec> = data
        .registry
        .get_all_services()
        .await
        .into_iter()
        .map(|(service_id, service)| (service_id, ServiceSpec { ports: service.ports }))
        .collect();

    Ok(HttpResponse::Ok().json(services))
}

#[get("/services/{serviceId}")]
pub async fn get_all_service_instances(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in get_all_service_instances handler");

    let service_id = path.into_inner();
    let (ports, instances_map) = data
        .registry
        .get_service_instances(&service_id)
        .await
        .ok_or(RegistryError::ServiceNotFound(service_id))?;

    let reply = ServiceInstancesReply {
        ports,
        instances_ids: instances_map.keys().cloned().collect(),
        instances_map,
    };

    Ok(HttpResponse::Ok().json(reply))
}

#[post("/services/{serviceId}/{instanceId}")]
pub async fn register_service_instance(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<InstanceSpec>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in register_service_instance handler");

    let (service_id, instance_id) = path.into_inner();
    let observed_ip = req.peer_addr().map(|addr| addr.ip());

    data.registry
        .register_instance(&service_id, &instance_id, body.into_inner(), observed_ip)
        .await?;

    Ok(HttpResponse::Ok().finish())
}

#[delete("/services/{serviceId}/{instanceId}")]
pub async fn delete_service_instance(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in delete_service_instance handler");

    let (service_id, instance_id) = path.into_inner();
    data.registry
        .delete_instance(&service_id, &instance_id)
        .await?;

    Ok(HttpResponse::Ok().finish())
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    status: Option<String>,
}

/// Without a `status` query parameter this is a heartbeat; with one it is a
/// state-change request, which is recognized but not implemented.
#[put("/services/{serviceId}/{instanceId}")]
pub async fn heartbeat_service_instance(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<StatusQuery>,
) -> Result<HttpResponse, AppError> {
    let (service_id, instance_id) = path.into_inner();

    if let Some(status) = &query.status {
        debug!("status query param: {}", status);
        if status != STATUS_UP && status != STATUS_OUT_OF_SERVICE {
            return Err(RegistryError::IllegalArgument(format!("invalid status '{}'", status)).into());
        }
        return Ok(HttpResponse::NotImplemented().finish());
    }

    data.registry.heartbeat(&service_id, &instance_id).await?;
    Ok(HttpResponse::Ok().finish())
}

#[post("/services/{serviceId}/{instanceId}/alive")]
pub async fn register_heartbeat(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (service_id, instance_id) = path.into_inner();
    data.registry.register_heartbeat(&service_id, &instance_id)?;

    Ok(HttpResponse::Ok().finish())
}

#[get("/services/{serviceId}/{instanceId}")]
pub async fn get_service_instance(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in get_service_instance handler");

    let (service_id, instance_id) = path.into_inner();
    let instance = data
        .registry
        .get_service_instance(&service_id, &instance_id)
        .await
        .ok_or(RegistryError::InstanceNotFound(instance_id))?;

    Ok(HttpResponse::Ok().json(instance))
}

#[get("/instances/{instanceId}")]
pub async fn get_instance(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let instance_id = path.into_inner();
    let (ports, instance) = data
        .registry
        .get_instance(&instance_id)
        .await
        .ok_or(RegistryError::InstanceNotFound(instance_id))?;

    Ok(HttpResponse::Ok().json(InstanceReply { ports, instance }))
}
