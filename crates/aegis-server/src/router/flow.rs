//! The flow step endpoint: one call per ceremony round trip.

use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use flow::response::FlowStepResponse;
use serde::Deserialize;
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::router::API_TAG;
use crate::service::AegisService;

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new().routes(routes!(route_authenticate))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct FlowStepRequest {
    /// Ceremony id of an ongoing flow; absent on the first call.
    #[serde(default)]
    flow_id: Option<String>,
    /// Application whose bound flow should start a fresh ceremony.
    #[serde(default)]
    application_id: Option<String>,
    #[serde(default)]
    action_id: Option<String>,
    #[serde(default)]
    inputs: HashMap<String, String>,
}

/// Step an authentication/registration flow
#[utoipa::path(
    post,
    path = "/flow/authenticate",
    tags = [API_TAG],
    request_body = FlowStepRequest,
    responses(
        (status = 200, description = "Flow step payload", body = FlowStepResponse),
        (status = 400, description = "Invalid request", body = CommonError),
        (status = 404, description = "Unknown ceremony or flow", body = CommonError),
        (status = 409, description = "Concurrent submission rejected", body = CommonError),
        (status = 500, description = "Server error", body = CommonError),
    ),
)]
async fn route_authenticate(
    State(service): State<AegisService>,
    Json(request): Json<FlowStepRequest>,
) -> Response {
    let result = match (&request.flow_id, &request.application_id) {
        (Some(ceremony_id), _) => {
            service
                .oauth
                .step(ceremony_id, request.action_id, request.inputs)
                .await
        }
        (None, Some(application_id)) => match service.applications.get(application_id).await {
            Ok(application) => {
                let flow_id = application
                    .auth_flow_id
                    .unwrap_or_else(|| service.config.default_auth_flow_id.clone());
                service
                    .oauth
                    .start_flow(&flow_id, request.action_id, request.inputs)
                    .await
            }
            Err(e) => Err(e),
        },
        (None, None) => Err(CommonError::invalid_request(
            "either flowId or applicationId is required",
        )),
    };

    match result {
        Ok(step) => {
            let mut payload = step.step;
            // An authorize-initiated ceremony concludes with the code
            // redirect in place of a view.
            if let Some(redirect) = step.completion_redirect {
                payload.redirect_url = Some(redirect);
            }
            Json(payload).into_response()
        }
        Err(e) => e.into_response(),
    }
}
