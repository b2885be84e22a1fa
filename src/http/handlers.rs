//! HTTP request handlers.
//!
//! Each handler maps one route onto a [`KvRunner`] operation. Errors are
//! rendered by the [`ResponseError`](actix_web::ResponseError) impl of
//! [`Error`].

use crate::KvRunner;
use crate::error::{Error, Result};
use crate::http::types::{CreateInstanceRequest, HealthResponse};
use actix_web::{
    HttpResponse,
    web::{Data, Json, Path},
};

/// `POST /api/instances`
pub async fn create_instance(
    runner: Data<KvRunner>,
    body: Json<CreateInstanceRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    tracing::debug!(id = %request.id, port = ?request.port, "Create instance request");

    let created = runner.create_with_port(&request.id, request.port).await?;
    Ok(HttpResponse::Created().json(created))
}

/// `GET /api/instances`
pub async fn list_instances(runner: Data<KvRunner>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.list().await?))
}

/// `GET /api/instances/{id}`
pub async fn get_instance(runner: Data<KvRunner>, id: Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.get(&id).await?))
}

/// `DELETE /api/instances/{id}`
pub async fn delete_instance(runner: Data<KvRunner>, id: Path<String>) -> Result<HttpResponse> {
    runner.delete(&id).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/instances/{id}/start`
pub async fn start_instance(runner: Data<KvRunner>, id: Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.start(&id).await?))
}

/// `POST /api/instances/{id}/stop`
pub async fn stop_instance(runner: Data<KvRunner>, id: Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.stop(&id).await?))
}

/// `GET /api/instances/{id}/status`
pub async fn instance_status(runner: Data<KvRunner>, id: Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.status(&id).await?))
}

/// `POST /api/reconcile`
pub async fn reconcile(runner: Data<KvRunner>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(runner.reconcile().await?))
}

/// `GET /health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Turns body deserialization failures into JSON 400 responses.
pub(crate) fn json_error(
    err: actix_web::error::JsonPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    Error::InvalidRequest(err.to_string()).into()
}
