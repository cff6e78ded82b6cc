//! External IdP login over the OAuth2 authorization-code flow.
//!
//! First visit builds the authorization URL and suspends with an external
//! redirection; resumption validates state, exchanges the code (one retry
//! on transient network failure) and resolves the local user from the
//! provider's userinfo document.

use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use serde_json::{Value, json};
use shared::codec::{b64url_encode, random_bytes};
use shared::error::CommonError;

use crate::context::FlowContext;
use crate::definition::FlowType;
use crate::graph::PROP_IDP_NAME;
use crate::response::{AuthenticatedUser, ExecutorResponse};

use super::{ExecutorDeps, TaskNode};

const STATE_KEY: &str = "oauthState";
const CODE_INPUT: &str = "code";
const STATE_INPUT: &str = "state";
const USER_ID_KEY: &str = "userId";

/// Per-provider defaults; IdP properties override every endpoint.
pub struct OAuthProviderProfile {
    pub display_name: &'static str,
    pub authorize_endpoint: &'static str,
    pub token_endpoint: &'static str,
    pub userinfo_endpoint: &'static str,
    pub scopes: &'static str,
    /// Userinfo field carrying the subject.
    pub sub_field: &'static str,
}

pub const GITHUB: OAuthProviderProfile = OAuthProviderProfile {
    display_name: "GitHub",
    authorize_endpoint: "https://github.com/login/oauth/authorize",
    token_endpoint: "https://github.com/login/oauth/access_token",
    userinfo_endpoint: "https://api.github.com/user",
    scopes: "user:email",
    sub_field: "id",
};

pub const GOOGLE: OAuthProviderProfile = OAuthProviderProfile {
    display_name: "Google",
    authorize_endpoint: "https://accounts.google.com/o/oauth2/v2/auth",
    token_endpoint: "https://oauth2.googleapis.com/token",
    userinfo_endpoint: "https://openidconnect.googleapis.com/v1/userinfo",
    scopes: "openid email profile",
    sub_field: "sub",
};

pub async fn execute(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
    profile: &OAuthProviderProfile,
) -> Result<ExecutorResponse, CommonError> {
    let idp_name = node
        .base
        .properties
        .get(PROP_IDP_NAME)
        .ok_or_else(|| {
            CommonError::Unknown(anyhow::anyhow!(
                "node '{}' lost its {PROP_IDP_NAME} property after compilation",
                node.base.id
            ))
        })?
        .clone();
    let idp = deps.idps.get_by_name(&idp_name).await?;

    let client_id = required_property(&idp, "client_id")?;
    let client_secret = required_property(&idp, "client_secret")?;
    let redirect_uri = required_property(&idp, "redirect_uri")?;

    let code = context
        .user_inputs
        .get(CODE_INPUT)
        .filter(|c| !c.is_empty())
        .cloned();

    match code {
        None => begin_redirect(context, profile, &idp, &idp_name, &client_id, &redirect_uri),
        Some(code) => {
            complete_login(
                deps,
                context,
                profile,
                &idp,
                &code,
                &client_id,
                &client_secret,
                &redirect_uri,
            )
            .await
        }
    }
}

fn begin_redirect(
    context: &mut FlowContext,
    profile: &OAuthProviderProfile,
    idp: &resources::idp::IdentityProvider,
    idp_name: &str,
    client_id: &str,
    redirect_uri: &str,
) -> Result<ExecutorResponse, CommonError> {
    let authorize_endpoint = idp
        .property("authorization_endpoint")
        .unwrap_or(profile.authorize_endpoint);

    let auth_url = AuthUrl::new(authorize_endpoint.to_string())
        .map_err(|e| CommonError::invalid_request(format!("invalid authorization endpoint: {e}")))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| CommonError::invalid_request(format!("invalid redirect URI: {e}")))?;

    let client = oauth2::basic::BasicClient::new(ClientId::new(client_id.to_string()))
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url);

    let state = b64url_encode(random_bytes::<16>());
    let csrf = CsrfToken::new(state.clone());
    let mut auth_request = client.authorize_url(move || csrf.clone());

    let scopes = idp.property("scopes").unwrap_or(profile.scopes);
    for scope in scopes.split([' ', ',']).filter(|s| !s.is_empty()) {
        auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
    }

    let (url, _) = auth_request.url();

    let mut response = ExecutorResponse::redirection(url.to_string());
    response
        .runtime_data
        .insert(STATE_KEY.to_string(), state);
    response
        .additional_data
        .insert("idpName".to_string(), json!(idp_name));
    // Stale codes from an earlier provider round trip must not resume us.
    context.user_inputs.remove(CODE_INPUT);
    context.user_inputs.remove(STATE_INPUT);
    Ok(response)
}

#[allow(clippy::too_many_arguments)]
async fn complete_login(
    deps: &ExecutorDeps,
    context: &mut FlowContext,
    profile: &OAuthProviderProfile,
    idp: &resources::idp::IdentityProvider,
    code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
) -> Result<ExecutorResponse, CommonError> {
    // CSRF: the state we issued must come back unchanged.
    let expected_state = context.runtime_data.get(STATE_KEY).cloned().unwrap_or_default();
    let returned_state = context
        .user_inputs
        .get(STATE_INPUT)
        .cloned()
        .unwrap_or_default();
    if expected_state.is_empty() || expected_state != returned_state {
        return Ok(ExecutorResponse::failure("Invalid state parameter"));
    }
    context.runtime_data.remove(STATE_KEY);

    let access_token = exchange_code(
        deps,
        profile,
        idp,
        code,
        client_id,
        client_secret,
        redirect_uri,
    )
    .await?;

    let userinfo_endpoint = idp
        .property("userinfo_endpoint")
        .unwrap_or(profile.userinfo_endpoint);
    let userinfo = fetch_userinfo(deps, userinfo_endpoint, &access_token).await?;

    let sub = userinfo
        .get(profile.sub_field)
        .map(value_to_string)
        .ok_or_else(|| CommonError::InvalidResponse {
            msg: format!("{} userinfo carries no subject", profile.display_name),
            source: None,
        })?;
    let email = userinfo.get("email").and_then(|v| v.as_str()).map(str::to_string);

    // Match the local account by email when present, else by subject.
    let mut filters = serde_json::Map::new();
    match &email {
        Some(email) => {
            filters.insert("email".to_string(), json!(email));
        }
        None => {
            filters.insert("sub".to_string(), json!(sub));
        }
    }

    match deps.users.identify(&filters).await {
        Ok(user) => match context.flow_type {
            FlowType::Authentication => {
                let mut response = ExecutorResponse::complete(AuthenticatedUser {
                    is_authenticated: true,
                    user_id: Some(user.id.clone()),
                    attributes: user.attributes,
                });
                response.runtime_data.insert(USER_ID_KEY.to_string(), user.id);
                Ok(response)
            }
            FlowType::Registration => Ok(ExecutorResponse::failure("User already exists")),
        },
        Err(CommonError::NotFound { .. }) => match context.flow_type {
            FlowType::Authentication => Ok(ExecutorResponse::failure("User not found")),
            FlowType::Registration => {
                let mut pending = serde_json::Map::new();
                pending.insert("sub".to_string(), json!(sub));
                if let Some(email) = email {
                    pending.insert("email".to_string(), json!(email));
                }
                if let Some(name) = userinfo.get("name").and_then(|v| v.as_str()) {
                    pending.insert("name".to_string(), json!(name));
                }
                let mut response =
                    ExecutorResponse::complete(AuthenticatedUser::unauthenticated());
                response.runtime_data.insert(
                    "pendingAttributes".to_string(),
                    Value::Object(pending).to_string(),
                );
                Ok(response)
            }
        },
        Err(other) => Err(other),
    }
}

async fn exchange_code(
    deps: &ExecutorDeps,
    profile: &OAuthProviderProfile,
    idp: &resources::idp::IdentityProvider,
    code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
) -> Result<String, CommonError> {
    let token_endpoint = idp
        .property("token_endpoint")
        .unwrap_or(profile.token_endpoint);

    let auth_url = AuthUrl::new(profile.authorize_endpoint.to_string())
        .map_err(|e| CommonError::invalid_request(format!("invalid authorization endpoint: {e}")))?;
    let token_url = TokenUrl::new(token_endpoint.to_string())
        .map_err(|e| CommonError::invalid_request(format!("invalid token endpoint: {e}")))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|e| CommonError::invalid_request(format!("invalid redirect URI: {e}")))?;

    let client = oauth2::basic::BasicClient::new(ClientId::new(client_id.to_string()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url)
        .set_client_secret(ClientSecret::new(client_secret.to_string()));

    let mut last_err = None;
    // One retry on a transient network error; provider-side rejections are
    // final.
    for attempt in 0..2 {
        let request = client.exchange_code(AuthorizationCode::new(code.to_string()));
        match request.request_async(&deps.http).await {
            Ok(token_response) => {
                return Ok(token_response.access_token().secret().to_string());
            }
            Err(oauth2::RequestTokenError::Request(e)) => {
                tracing::warn!(provider = profile.display_name, attempt, error = %e, "token exchange transport error");
                last_err = Some(format!("{e}"));
            }
            Err(other) => {
                return Err(CommonError::InvalidResponse {
                    msg: format!("{} token exchange failed: {other}", profile.display_name),
                    source: None,
                });
            }
        }
    }

    Err(CommonError::InvalidResponse {
        msg: format!(
            "{} token endpoint unreachable: {}",
            profile.display_name,
            last_err.unwrap_or_default()
        ),
        source: None,
    })
}

async fn fetch_userinfo(
    deps: &ExecutorDeps,
    endpoint: &str,
    access_token: &str,
) -> Result<Value, CommonError> {
    let response = deps
        .http
        .get(endpoint)
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "aegis-iam")
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(CommonError::InvalidResponse {
            msg: format!("userinfo request failed: HTTP {}", response.status()),
            source: None,
        });
    }

    Ok(response.json().await?)
}

fn required_property(
    idp: &resources::idp::IdentityProvider,
    name: &str,
) -> Result<String, CommonError> {
    idp.property(name)
        .map(str::to_string)
        .ok_or_else(|| {
            // A misconfigured IdP is an integrity problem, not client error.
            CommonError::Unknown(anyhow::anyhow!(
                "identity provider '{}' is missing the '{name}' property",
                idp.name
            ))
        })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testsupport::{deps_with_user, task_node};
    use resources::idp::{IdpProperty, IdpRequest, IdpType};

    async fn deps_with_idp() -> ExecutorDeps {
        let deps = deps_with_user("jdoe", "pw").await;
        deps.idps
            .create(IdpRequest {
                name: "github".to_string(),
                description: None,
                idp_type: IdpType::Github,
                properties: vec![
                    IdpProperty {
                        name: "client_id".to_string(),
                        value: "gh-client".to_string(),
                        is_secret: false,
                    },
                    IdpProperty {
                        name: "client_secret".to_string(),
                        value: "gh-secret".to_string(),
                        is_secret: true,
                    },
                    IdpProperty {
                        name: "redirect_uri".to_string(),
                        value: "https://iam.example/flow/callback".to_string(),
                        is_secret: false,
                    },
                ],
            })
            .await
            .unwrap();
        deps
    }

    #[tokio::test]
    async fn test_first_visit_redirects_to_provider() {
        let deps = deps_with_idp().await;
        let mut base = task_node("github-login");
        base.properties
            .insert(PROP_IDP_NAME.to_string(), "github".to_string());
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("login", FlowType::Authentication, "github-login");
        let response = execute(&deps, &node, &mut ctx, &GITHUB).await.unwrap();

        assert_eq!(
            response.status(),
            crate::response::ExecutorStatus::ExternalRedirection
        );
        let url = response.redirect_url.unwrap();
        assert!(url.starts_with("https://github.com/login/oauth/authorize"));
        assert!(url.contains("client_id=gh-client"));
        assert!(url.contains("scope=user%3Aemail"));
        let state = response.runtime_data.get(STATE_KEY).unwrap();
        assert!(url.contains(&format!("state={state}")));
        assert_eq!(response.additional_data.get("idpName").unwrap(), "github");
    }

    #[tokio::test]
    async fn test_state_mismatch_fails() {
        let deps = deps_with_idp().await;
        let mut base = task_node("github-login");
        base.properties
            .insert(PROP_IDP_NAME.to_string(), "github".to_string());
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("login", FlowType::Authentication, "github-login");
        ctx.runtime_data
            .insert(STATE_KEY.to_string(), "expected".to_string());
        ctx.user_inputs
            .insert(CODE_INPUT.to_string(), "auth-code".to_string());
        ctx.user_inputs
            .insert(STATE_INPUT.to_string(), "tampered".to_string());

        let response = execute(&deps, &node, &mut ctx, &GITHUB).await.unwrap();
        assert_eq!(response.status(), crate::response::ExecutorStatus::Failure);
        assert_eq!(
            response.failure_reason.as_deref(),
            Some("Invalid state parameter")
        );
    }

    #[tokio::test]
    async fn test_missing_idp_property_is_server_error() {
        let deps = deps_with_user("jdoe", "pw").await;
        deps.idps
            .create(IdpRequest {
                name: "github".to_string(),
                description: None,
                idp_type: IdpType::Github,
                properties: vec![],
            })
            .await
            .unwrap();

        let mut base = task_node("github-login");
        base.properties
            .insert(PROP_IDP_NAME.to_string(), "github".to_string());
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };
        let mut ctx = FlowContext::new("login", FlowType::Authentication, "github-login");

        let err = execute(&deps, &node, &mut ctx, &GITHUB).await.unwrap_err();
        assert!(matches!(err, CommonError::Unknown(_)));
    }
}
