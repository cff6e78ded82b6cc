//! WebAuthn ceremony endpoints. The core is value-oriented; this layer
//! owns ceremony and credential storage.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::codec::{b64url_decode, b64url_encode};
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use uuid::Uuid;
use webauthn::WebAuthnError;
use webauthn::types::{
    AssertionResponse, Credential, CredentialCreationOptions, CredentialRequestOptions,
    RegistrationResponse, UserVerificationRequirement, WebAuthnUser,
};

use crate::router::API_TAG;
use crate::service::{AegisService, WebAuthnCeremony};

pub fn create_routes() -> OpenApiRouter<AegisService> {
    OpenApiRouter::new()
        .routes(routes!(route_register_begin))
        .routes(routes!(route_register_finish))
        .routes(routes!(route_login_begin))
        .routes(routes!(route_login_finish))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct BeginRequest {
    /// Required for registration; optional for passkey login.
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user_verification: Option<UserVerificationRequirement>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct RegisterBeginResponse {
    ceremony_id: String,
    options: CredentialCreationOptions,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LoginBeginResponse {
    ceremony_id: String,
    options: CredentialRequestOptions,
}

/// Client-parsed credential payload, all byte fields base64url.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct FinishRequest {
    ceremony_id: String,
    raw_id: String,
    client_data_json: String,
    #[serde(default)]
    attestation_object: Option<String>,
    #[serde(default)]
    authenticator_data: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    user_handle: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CredentialSummary {
    id: String,
    attestation_type: String,
    sign_count: u32,
    clone_warning: bool,
}

impl CredentialSummary {
    fn from_credential(credential: &Credential) -> Self {
        Self {
            id: b64url_encode(&credential.id),
            attestation_type: credential.attestation_type.clone(),
            sign_count: credential.authenticator.sign_count,
            clone_warning: credential.authenticator.clone_warning,
        }
    }
}

async fn resolve_webauthn_user(
    service: &AegisService,
    username: &str,
) -> Result<WebAuthnUser, CommonError> {
    let mut filters = serde_json::Map::new();
    filters.insert("username".to_string(), json!(username));
    let user = service.users.identify(&filters).await?;

    let credentials = service
        .webauthn_credentials
        .get(&user.id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();

    let display_name = user
        .attribute("given_name")
        .and_then(|v| v.as_str())
        .unwrap_or(username)
        .to_string();

    Ok(WebAuthnUser {
        id: user.id.into_bytes(),
        name: username.to_string(),
        display_name,
        credentials,
    })
}

/// Begin credential registration
#[utoipa::path(
    post,
    path = "/webauthn/register/begin",
    tags = [API_TAG],
    request_body = BeginRequest,
    responses(
        (status = 200, description = "Creation options", body = RegisterBeginResponse),
        (status = 400, description = "Invalid request", body = CommonError),
        (status = 404, description = "Unknown user", body = CommonError),
    ),
)]
async fn route_register_begin(
    State(service): State<AegisService>,
    Json(request): Json<BeginRequest>,
) -> Response {
    let Some(username) = request.username.as_deref().filter(|u| !u.is_empty()) else {
        return CommonError::invalid_request("username is required").into_response();
    };

    let user = match resolve_webauthn_user(&service, username).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let user_verification = request
        .user_verification
        .unwrap_or(UserVerificationRequirement::Preferred);
    let (options, session) = service
        .relying_party
        .begin_registration(&user, user_verification);

    let ceremony_id = Uuid::new_v4().to_string();
    service
        .webauthn_ceremonies
        .insert(ceremony_id.clone(), WebAuthnCeremony { session, user });

    Json(RegisterBeginResponse {
        ceremony_id,
        options,
    })
    .into_response()
}

/// Finish credential registration
#[utoipa::path(
    post,
    path = "/webauthn/register/finish",
    tags = [API_TAG],
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Credential registered", body = CredentialSummary),
        (status = 400, description = "Invalid attestation", body = CommonError),
        (status = 404, description = "Unknown ceremony", body = CommonError),
    ),
)]
async fn route_register_finish(
    State(service): State<AegisService>,
    Json(request): Json<FinishRequest>,
) -> Response {
    let Some((_, ceremony)) = service.webauthn_ceremonies.remove(&request.ceremony_id) else {
        return CommonError::not_found("unknown or expired ceremony", request.ceremony_id)
            .into_response();
    };

    let response = match decode_registration(&request) {
        Ok(response) => response,
        Err(e) => return e.into_response(),
    };

    match service
        .relying_party
        .finish_registration(&ceremony.user, &ceremony.session, &response)
    {
        Ok(credential) => {
            let user_id = String::from_utf8_lossy(&ceremony.user.id).into_owned();
            let summary = CredentialSummary::from_credential(&credential);
            service
                .webauthn_credentials
                .entry(user_id)
                .or_default()
                .push(credential);
            Json(summary).into_response()
        }
        Err(e) => CommonError::from(e).into_response(),
    }
}

/// Begin a login (assertion) ceremony
#[utoipa::path(
    post,
    path = "/webauthn/login/begin",
    tags = [API_TAG],
    request_body = BeginRequest,
    responses(
        (status = 200, description = "Request options", body = LoginBeginResponse),
        (status = 404, description = "Unknown user", body = CommonError),
    ),
)]
async fn route_login_begin(
    State(service): State<AegisService>,
    Json(request): Json<BeginRequest>,
) -> Response {
    let user = match request.username.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => match resolve_webauthn_user(&service, username).await {
            Ok(user) => Some(user),
            Err(e) => return e.into_response(),
        },
        // Passkey flow: the authenticator picks the credential.
        None => None,
    };

    let user_verification = request
        .user_verification
        .unwrap_or(UserVerificationRequirement::Preferred);
    let (options, session) = service
        .relying_party
        .begin_login(user.as_ref(), user_verification);

    let ceremony_id = Uuid::new_v4().to_string();
    service.webauthn_ceremonies.insert(
        ceremony_id.clone(),
        WebAuthnCeremony {
            session,
            user: user.unwrap_or(WebAuthnUser {
                id: vec![],
                name: String::new(),
                display_name: String::new(),
                credentials: vec![],
            }),
        },
    );

    Json(LoginBeginResponse {
        ceremony_id,
        options,
    })
    .into_response()
}

/// Finish a login (assertion) ceremony
#[utoipa::path(
    post,
    path = "/webauthn/login/finish",
    tags = [API_TAG],
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Assertion verified", body = CredentialSummary),
        (status = 400, description = "Invalid assertion", body = CommonError),
        (status = 401, description = "Verification failed", body = CommonError),
    ),
)]
async fn route_login_finish(
    State(service): State<AegisService>,
    Json(request): Json<FinishRequest>,
) -> Response {
    let Some((_, ceremony)) = service.webauthn_ceremonies.remove(&request.ceremony_id) else {
        return CommonError::not_found("unknown or expired ceremony", request.ceremony_id)
            .into_response();
    };

    let response = match decode_assertion(&request) {
        Ok(response) => response,
        Err(e) => return e.into_response(),
    };

    let outcome = if ceremony.user.id.is_empty() {
        // Passkey path: resolve the user from the credential id.
        service
            .relying_party
            .finish_passkey_login(&ceremony.session, &response, |raw_id, _user_handle| {
                for entry in service.webauthn_credentials.iter() {
                    if entry.value().iter().any(|c| c.id == raw_id) {
                        return Ok(WebAuthnUser {
                            id: entry.key().clone().into_bytes(),
                            name: entry.key().clone(),
                            display_name: entry.key().clone(),
                            credentials: entry.value().clone(),
                        });
                    }
                }
                Err(WebAuthnError::Verification(
                    "no user owns this credential".to_string(),
                ))
            })
    } else {
        service
            .relying_party
            .finish_login(&ceremony.user, &ceremony.session, &response)
            .map(|credential| (ceremony.user.clone(), credential))
    };

    match outcome {
        Ok((user, credential)) => {
            let user_id = String::from_utf8_lossy(&user.id).into_owned();
            persist_credential(&service, &user_id, &credential);
            Json(CredentialSummary::from_credential(&credential)).into_response()
        }
        Err(WebAuthnError::CloneWarning(credential)) => {
            // The warning flag must survive the failed assertion.
            let user_id = String::from_utf8_lossy(&ceremony.user.id).into_owned();
            persist_credential(&service, &user_id, &credential);
            CommonError::from(WebAuthnError::CloneWarning(credential)).into_response()
        }
        Err(e) => CommonError::from(e).into_response(),
    }
}

fn persist_credential(service: &AegisService, user_id: &str, credential: &Credential) {
    if let Some(mut entry) = service.webauthn_credentials.get_mut(user_id)
        && let Some(stored) = entry.value_mut().iter_mut().find(|c| c.id == credential.id)
    {
        *stored = credential.clone();
    }
}

fn decode_registration(request: &FinishRequest) -> Result<RegistrationResponse, CommonError> {
    let attestation_object = request
        .attestation_object
        .as_deref()
        .ok_or_else(|| CommonError::invalid_request("attestationObject is required"))?;
    Ok(RegistrationResponse {
        raw_id: b64url_decode(&request.raw_id)?,
        client_data_json: b64url_decode(&request.client_data_json)?,
        attestation_object: b64url_decode(attestation_object)?,
    })
}

fn decode_assertion(request: &FinishRequest) -> Result<AssertionResponse, CommonError> {
    let authenticator_data = request
        .authenticator_data
        .as_deref()
        .ok_or_else(|| CommonError::invalid_request("authenticatorData is required"))?;
    let signature = request
        .signature
        .as_deref()
        .ok_or_else(|| CommonError::invalid_request("signature is required"))?;
    Ok(AssertionResponse {
        raw_id: b64url_decode(&request.raw_id)?,
        client_data_json: b64url_decode(&request.client_data_json)?,
        authenticator_data: b64url_decode(authenticator_data)?,
        signature: b64url_decode(signature)?,
        user_handle: request
            .user_handle
            .as_deref()
            .map(b64url_decode)
            .transpose()?,
    })
}
