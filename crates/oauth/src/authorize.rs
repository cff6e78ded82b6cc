//! The authorize endpoint: request validation, ceremony hand-off to the
//! flow engine, and code issuance on completion.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use flow::engine::FlowInput;
use flow::response::{FlowStatus, FlowStepResponse, FlowStepResult};
use resources::application::{Application, ApplicationService, ResponseType};
use serde::Deserialize;
use serde_json::Value;
use shared::error::CommonError;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::claims::ClaimsRequest;
use crate::codes::AuthorizationCodeData;
use crate::OAuthService;

const PENDING_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    pub response_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    /// JSON-encoded OIDC claims request.
    #[serde(default)]
    pub claims: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Everything the token issuance step needs once the ceremony completes.
#[derive(Debug, Clone)]
pub(crate) struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub claims_request: Option<ClaimsRequest>,
    pub nonce: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) struct PendingAuthorizations {
    entries: DashMap<String, PendingAuthorization>,
}

impl PendingAuthorizations {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn insert(&self, ceremony_id: String, pending: PendingAuthorization) {
        self.entries.insert(ceremony_id, pending);
    }

    fn get(&self, ceremony_id: &str) -> Option<PendingAuthorization> {
        let entry = self.entries.get(ceremony_id)?;
        if entry.expires_at < Utc::now() {
            drop(entry);
            self.entries.remove(ceremony_id);
            return None;
        }
        Some(entry.clone())
    }

    fn remove(&self, ceremony_id: &str) {
        self.entries.remove(ceremony_id);
    }
}

/// Result of an authorize call or a subsequent flow step.
#[derive(Debug, Clone)]
pub struct AuthorizeStepResult {
    pub ceremony_id: String,
    pub step: FlowStepResponse,
    /// Populated once the ceremony completed: where to send the browser,
    /// carrying `code` (and `state`).
    pub completion_redirect: Option<String>,
}

impl OAuthService {
    /// Validate an authorization request and start the login ceremony.
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
    ) -> Result<AuthorizeStepResult, CommonError> {
        let application = self
            .applications
            .get_by_client_id(&request.client_id)
            .await?
            .ok_or_else(|| CommonError::authentication("unauthorized_client"))?;

        let redirect_uri = ApplicationService::validate_redirect_uri(
            &application,
            request.redirect_uri.as_deref(),
        )?
        .to_string();

        if request.response_type != "code"
            || !application.response_types.contains(&ResponseType::Code)
        {
            return Err(CommonError::invalid_request(
                "unsupported response_type for this client",
            ));
        }

        let (code_challenge, code_challenge_method) =
            validate_pkce_parameters(&application, &request)?;

        let scopes: Vec<String> = request
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let claims_request = match request.claims.as_deref() {
            Some(raw) if !raw.is_empty() => Some(
                serde_json::from_str::<ClaimsRequest>(raw).map_err(|e| {
                    CommonError::invalid_request(format!("malformed claims parameter: {e}"))
                })?,
            ),
            _ => None,
        };

        let flow_id = application
            .auth_flow_id
            .clone()
            .unwrap_or_else(|| self.config.default_auth_flow_id.clone());

        let mut context = self.engine.start(&flow_id)?;
        let ceremony_id = context.ceremony_id.clone();

        self.pending.insert(
            ceremony_id.clone(),
            PendingAuthorization {
                client_id: application.client_id.clone(),
                redirect_uri,
                scopes,
                state: request.state,
                code_challenge,
                code_challenge_method,
                claims_request,
                nonce: request.nonce,
                expires_at: Utc::now() + Duration::minutes(PENDING_TTL_MINUTES),
            },
        );

        // Drive the ceremony to its first suspension point.
        let result = self.engine.execute(&mut context, FlowInput::empty()).await?;
        if result.flow_status == FlowStatus::Incomplete {
            self.contexts.create(context);
        }

        self.conclude_step(ceremony_id, result, 1).await
    }

    /// Start a ceremony directly from a flow definition id (the `/flow`
    /// endpoint's entry path) and drive it to its first suspension point.
    pub async fn start_flow(
        &self,
        flow_id: &str,
        action: Option<String>,
        inputs: HashMap<String, String>,
    ) -> Result<AuthorizeStepResult, CommonError> {
        let mut context = self.engine.start(flow_id)?;
        let ceremony_id = context.ceremony_id.clone();

        let result = self
            .engine
            .execute(&mut context, FlowInput { action, inputs })
            .await?;
        if result.flow_status == FlowStatus::Incomplete {
            self.contexts.create(context);
        }

        self.conclude_step(ceremony_id, result, 1).await
    }

    /// Advance an authorize-initiated ceremony with user input.
    pub async fn step(
        &self,
        ceremony_id: &str,
        action: Option<String>,
        inputs: HashMap<String, String>,
    ) -> Result<AuthorizeStepResult, CommonError> {
        let (mut context, version) = self.contexts.load(ceremony_id)?;
        let result = self
            .engine
            .execute(&mut context, FlowInput { action, inputs })
            .await?;

        match result.flow_status {
            FlowStatus::Incomplete => {
                // A concurrent submission with a stale version loses here.
                self.contexts.save(context, version)?;
            }
            FlowStatus::Complete | FlowStatus::Failure => {
                self.contexts.retire(ceremony_id);
            }
        }

        self.conclude_step(ceremony_id.to_string(), result, version)
            .await
    }

    async fn conclude_step(
        &self,
        ceremony_id: String,
        result: FlowStepResult,
        _version: u64,
    ) -> Result<AuthorizeStepResult, CommonError> {
        let mut completion_redirect = None;

        // Ceremonies started outside /oauth2/authorize have no pending
        // authorization; they complete without a code.
        if result.flow_status == FlowStatus::Complete
            && let Some(pending) = self.pending.get(&ceremony_id)
        {
            self.pending.remove(&ceremony_id);

            let user_id = result
                .authenticated_user
                .as_ref()
                .filter(|u| u.is_authenticated)
                .and_then(|u| u.user_id.clone())
                .ok_or_else(|| {
                    CommonError::authentication("ceremony completed without an authenticated user")
                })?;

            let code = self.codes.issue(AuthorizationCodeData {
                client_id: pending.client_id.clone(),
                redirect_uri: pending.redirect_uri.clone(),
                user_id,
                scopes: pending.scopes.clone(),
                code_challenge: pending.code_challenge.clone(),
                code_challenge_method: pending.code_challenge_method.clone(),
                claims_request: pending.claims_request.clone(),
                nonce: pending.nonce.clone(),
                authenticated_at: Utc::now(),
                expires_at: Utc::now(),
            });

            let mut redirect = format!(
                "{}?code={}",
                pending.redirect_uri,
                urlencoding::encode(&code)
            );
            if let Some(state) = &pending.state {
                redirect.push_str(&format!("&state={}", urlencoding::encode(state)));
            }
            completion_redirect = Some(redirect);
        } else if result.flow_status == FlowStatus::Failure {
            self.pending.remove(&ceremony_id);
        }

        Ok(AuthorizeStepResult {
            step: FlowStepResponse::from_result(ceremony_id.clone(), &result),
            ceremony_id,
            completion_redirect,
        })
    }
}

fn validate_pkce_parameters(
    application: &Application,
    request: &AuthorizeRequest,
) -> Result<(Option<String>, Option<String>), CommonError> {
    let challenge = request.code_challenge.clone().filter(|c| !c.is_empty());
    let method = request.code_challenge_method.clone().filter(|m| !m.is_empty());

    if application.requires_pkce() && challenge.is_none() {
        return Err(CommonError::invalid_request(
            "code_challenge is required for this client",
        ));
    }
    if let Some(method) = &method
        && method != "S256"
        && method != "plain"
    {
        return Err(CommonError::invalid_request(format!(
            "unsupported code_challenge_method '{method}'"
        )));
    }
    if challenge.is_some() && method.is_none() {
        // Default per RFC 7636 §4.3.
        return Ok((challenge, Some("plain".to_string())));
    }
    Ok((challenge, method))
}

/// Convenience used by handler tests and the router: extract a `data`
/// value from the flow payload.
pub fn data_string(step: &FlowStepResponse, key: &str) -> Option<String> {
    step.data.get(key).and_then(Value::as_str).map(str::to_string)
}
