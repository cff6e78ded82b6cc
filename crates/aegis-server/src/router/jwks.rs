//! Published JSON Web Key Set.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use crypto::keys::JwkSet;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::router::API_TAG;
use crate::service::AegisService;

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new().routes(routes!(route_jwks))
}

/// Current signing keys
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tags = [API_TAG],
    responses(
        (status = 200, description = "JWK set", body = JwkSet),
    ),
)]
async fn route_jwks(State(service): State<AegisService>) -> Response {
    Json(service.keys.jwks().clone()).into_response()
}
