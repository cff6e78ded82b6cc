//! HTTP edge: utoipa-annotated axum routes over the service layer.

pub mod applications;
pub mod flow;
pub mod idps;
pub mod jwks;
pub mod oauth;
pub mod webauthn;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa_axum::router::OpenApiRouter;

use crate::service::AegisService;

pub const API_TAG: &str = "aegis";

pub fn create_router(service: AegisService) -> Router {
    let (router, _api) = OpenApiRouter::new()
        .merge(oauth::create_routes())
        .merge(flow::create_routes())
        .merge(applications::create_routes())
        .merge(idps::create_routes())
        .merge(webauthn::create_routes())
        .merge(jwks::create_routes())
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).with_state(service)
}
