//! Application registry CRUD.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use resources::application::{Application, ApplicationRequest};
use serde::Serialize;
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::router::API_TAG;
use crate::service::AegisService;

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new()
        .routes(routes!(route_list_applications, route_create_application))
        .routes(routes!(
            route_get_application,
            route_update_application,
            route_delete_application
        ))
}

#[derive(Debug, Serialize, ToSchema)]
struct ApplicationResponse {
    #[serde(flatten)]
    application: Application,
    /// Present exactly once: in the response of the call that set it.
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
}

fn sanitize(mut application: Application) -> Application {
    application.hashed_client_secret = None;
    application
}

/// List applications
#[utoipa::path(
    get,
    path = "/applications",
    tags = [API_TAG],
    responses(
        (status = 200, description = "All registered applications", body = [Application]),
    ),
)]
async fn route_list_applications(State(service): State<AegisService>) -> Response {
    match service.applications.list().await {
        Ok(applications) => {
            let sanitized: Vec<Application> = applications.into_iter().map(sanitize).collect();
            Json(sanitized).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Register an application
#[utoipa::path(
    post,
    path = "/applications",
    tags = [API_TAG],
    request_body = ApplicationRequest,
    responses(
        (status = 201, description = "Application created"),
        (status = 400, description = "Invalid request", body = CommonError),
        (status = 409, description = "Duplicate name or client_id", body = CommonError),
    ),
)]
async fn route_create_application(
    State(service): State<AegisService>,
    Json(request): Json<ApplicationRequest>,
) -> Response {
    match service.applications.create(request).await {
        Ok((application, client_secret)) => (
            StatusCode::CREATED,
            Json(ApplicationResponse {
                application: sanitize(application),
                client_secret,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Fetch one application
#[utoipa::path(
    get,
    path = "/applications/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Application id")),
    responses(
        (status = 200, description = "The application", body = Application),
        (status = 404, description = "Not found", body = CommonError),
    ),
)]
async fn route_get_application(
    State(service): State<AegisService>,
    Path(id): Path<String>,
) -> Response {
    match service.applications.get(&id).await {
        Ok(application) => Json(sanitize(application)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Update an application
#[utoipa::path(
    put,
    path = "/applications/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Application id")),
    request_body = ApplicationRequest,
    responses(
        (status = 200, description = "Updated application"),
        (status = 400, description = "Invalid request or read-only", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
        (status = 409, description = "Duplicate name or client_id", body = CommonError),
    ),
)]
async fn route_update_application(
    State(service): State<AegisService>,
    Path(id): Path<String>,
    Json(request): Json<ApplicationRequest>,
) -> Response {
    match service.applications.update(&id, request).await {
        Ok((application, client_secret)) => Json(ApplicationResponse {
            application: sanitize(application),
            client_secret,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete an application (idempotent)
#[utoipa::path(
    delete,
    path = "/applications/{id}",
    tags = [API_TAG],
    params(("id" = String, Path, description = "Application id")),
    responses(
        (status = 204, description = "Deleted (or already absent)"),
        (status = 400, description = "Read-only application", body = CommonError),
    ),
)]
async fn route_delete_application(
    State(service): State<AegisService>,
    Path(id): Path<String>,
) -> Response {
    match service.applications.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
