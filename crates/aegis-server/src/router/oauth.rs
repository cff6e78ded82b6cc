//! OAuth2/OIDC endpoints: authorize, token, userinfo, introspect.

use axum::Form;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Redirect, Response};
use base64::Engine;
use oauth::authorize::AuthorizeRequest;
use oauth::introspect::IntrospectionResponse;
use oauth::token::{TokenRequest, TokenResponse};
use serde::Deserialize;
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::router::API_TAG;
use crate::service::AegisService;

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new()
        .routes(routes!(route_authorize))
        .routes(routes!(route_token))
        .routes(routes!(route_userinfo))
        .routes(routes!(route_introspect))
}

/// Begin an authorization ceremony
#[utoipa::path(
    post,
    path = "/oauth2/authorize",
    tags = [API_TAG],
    responses(
        (status = 200, description = "Flow payload for the login surface"),
        (status = 302, description = "Ceremony already complete; redirect carries the code"),
        (status = 400, description = "invalid_request", body = CommonError),
        (status = 401, description = "unauthorized_client", body = CommonError),
    ),
)]
async fn route_authorize(
    State(service): State<AegisService>,
    Form(request): Form<AuthorizeRequest>,
) -> Response {
    match service.oauth.authorize(request).await {
        Ok(result) => match result.completion_redirect {
            Some(redirect) => Redirect::to(&redirect).into_response(),
            None => Json(result.step).into_response(),
        },
        Err(e) => e.into_response(),
    }
}

/// Exchange a grant for tokens
#[utoipa::path(
    post,
    path = "/oauth2/token",
    tags = [API_TAG],
    responses(
        (status = 200, description = "Token response", body = TokenResponse),
        (status = 400, description = "invalid_grant", body = CommonError),
        (status = 401, description = "invalid_client", body = CommonError),
    ),
)]
async fn route_token(
    State(service): State<AegisService>,
    headers: HeaderMap,
    Form(mut request): Form<TokenRequest>,
) -> Response {
    // client_secret_basic: credentials in the Authorization header win
    // over body parameters.
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        request.client_id = Some(client_id);
        request.client_secret = Some(client_secret);
    }

    match service.oauth.token(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Return the authenticated user's claims
#[utoipa::path(
    get,
    path = "/oauth2/userinfo",
    tags = [API_TAG],
    responses(
        (status = 200, description = "Claims JSON"),
        (status = 401, description = "invalid_token", body = CommonError),
        (status = 403, description = "insufficient_scope", body = CommonError),
    ),
)]
async fn route_userinfo(State(service): State<AegisService>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return CommonError::authentication("invalid_token: missing bearer token").into_response();
    };

    match service.oauth.userinfo(&token).await {
        Ok(claims) => Json(claims).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
struct IntrospectForm {
    token: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Introspect a token (RFC 7662)
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    tags = [API_TAG],
    responses(
        (status = 200, description = "Introspection response", body = IntrospectionResponse),
        (status = 401, description = "invalid_client", body = CommonError),
    ),
)]
async fn route_introspect(
    State(service): State<AegisService>,
    headers: HeaderMap,
    Form(mut form): Form<IntrospectForm>,
) -> Response {
    if let Some((client_id, client_secret)) = basic_credentials(&headers) {
        form.client_id = Some(client_id);
        form.client_secret = Some(client_secret);
    }

    // Introspection is for registered clients only.
    let (Some(client_id), Some(client_secret)) = (form.client_id, form.client_secret) else {
        return CommonError::authentication("invalid_client").into_response();
    };
    if let Err(e) = service
        .applications
        .validate_credentials(&client_id, &client_secret)
        .await
    {
        return e.into_response();
    }

    Json(service.oauth.introspect(&form.token)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;
    Some((client_id.to_string(), client_secret.to_string()))
}
