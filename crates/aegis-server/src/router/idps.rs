//! Identity provider registry CRUD.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use resources::idp::{IdentityProvider, IdpRequest};
use shared::error::CommonError;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::router::API_TAG;
use crate::service::AegisService;

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new()
        .routes(routes!(route_list_idps, route_create_idp))
        .routes(routes!(route_get_idp, route_update_idp, route_delete_idp))
}

/// List identity providers (secret properties masked)
#[utoipa::path(
    get,
    path = "/identity-providers",
    tags = [API_TAG],
    responses(
        (status = 200, description = "All identity providers", body = [IdentityProvider]),
    ),
)]
async fn route_list_idps(State(service): State<AegisService>) -> Response {
    match service.idps.list().await {
        Ok(idps) => Json(idps).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Register an identity provider
#[utoipa::path(
    post,
    path = "/identity-providers",
    tags = [API_TAG],
    request_body = IdpRequest,
    responses(
        (status = 201, description = "Identity provider created", body = IdentityProvider),
        (status = 400, description = "Invalid request", body = CommonError),
        (status = 409, description = "Duplicate name", body = CommonError),
    ),
)]
async fn route_create_idp(
    State(service): State<AegisService>,
    Json(request): Json<IdpRequest>,
) -> Response {
    match service.idps.create(request).await {
        Ok(idp) => (StatusCode::CREATED, Json(idp.redacted())).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Fetch one identity provider
#[utoipa::path(
    get,
    path = "/identity-providers/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Identity provider id")),
    responses(
        (status = 200, description = "The identity provider", body = IdentityProvider),
        (status = 404, description = "Not found", body = CommonError),
    ),
)]
async fn route_get_idp(State(service): State<AegisService>, Path(id): Path<String>) -> Response {
    match service.idps.get(&id).await {
        Ok(idp) => Json(idp.redacted()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Update an identity provider
#[utoipa::path(
    put,
    path = "/identity-providers/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Identity provider id")),
    request_body = IdpRequest,
    responses(
        (status = 200, description = "Updated identity provider", body = IdentityProvider),
        (status = 400, description = "Invalid request or read-only", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
        (status = 409, description = "Duplicate name", body = CommonError),
    ),
)]
async fn route_update_idp(
    State(service): State<AegisService>,
    Path(id): Path<String>,
    Json(request): Json<IdpRequest>,
) -> Response {
    match service.idps.update(&id, request).await {
        Ok(idp) => Json(idp.redacted()).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete an identity provider (idempotent)
#[utoipa::path(
    delete,
    path = "/identity-providers/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Identity provider id")),
    responses(
        (status = 204, description = "Deleted (or already absent)"),
        (status = 400, description = "Read-only identity provider", body = CommonError),
    ),
)]
async fn route_delete_idp(State(service): State<AegisService>, Path(id): Path<String>) -> Response {
    match service.idps.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
