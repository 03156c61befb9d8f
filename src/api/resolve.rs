// Name-resolution handler

use actix_web::{post, web, HttpResponse};
use tracing::debug;

use crate::api::model::{ResolveReply, ResolveRequest};
use crate::error::{AppError, RegistryError};
use crate::model::common::AppState;

#[post("/resolve")]
pub async fn resolve(
    data: web::Data<AppState>,
    body: web::Json<ResolveRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();

    let (host, port) = data
        .registry
        .resolve(&request.host, &request.port)
        .await
        .ok_or_else(|| {
            RegistryError::ResolveNotFound(format!("{}:{}", request.host, request.port))
        })?;

    debug!("resolved {}:{} to {}:{}", request.host, request.port, host, port);
    Ok(HttpResponse::Ok().json(ResolveReply { host, port }))
}
