// Gossip and neighbor handlers
// Ingress for discover messages, neighbor joins, the who-are-you identity
// endpoint and the table inspection snapshot.

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use tracing::debug;

use crate::api::model::{DiscoverMessage, NeighborSpec, WhoReply};
use crate::error::AppError;
use crate::model::common::AppState;

#[post("/discover")]
pub async fn discover(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<DiscoverMessage>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in discover handler");

    let peer_ip = req.peer_addr().map(|addr| addr.ip());
    data.registry.ingest_discover(peer_ip, body.into_inner()).await;

    Ok(HttpResponse::Ok().finish())
}

#[post("/neighbor")]
pub async fn add_neighbor(
    data: web::Data<AppState>,
    body: web::Json<NeighborSpec>,
) -> Result<HttpResponse, AppError> {
    debug!("handling request in add_neighbor handler");

    data.registry.add_neighbor(&body.addr).await?;
    Ok(HttpResponse::Ok().finish())
}

#[get("/who")]
pub async fn who_are_you(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(WhoReply {
        id: data.registry.id().to_string(),
    }))
}

#[get("/table")]
pub async fn get_table(data: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(data.registry.table_snapshot().await))
}
