//! Pluggable user authentication: the internal user service, a REST
//! delegate, or disabled entirely.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::error::CommonError;
use thiserror::Error;
use utoipa::ToSchema;

use crate::user::UserService;

const API_KEY_HEADER: &str = "API-KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthnErrorCode {
    UserNotFound,
    AuthenticationFailed,
    SystemError,
    NotImplemented,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct AuthnError {
    pub code: AuthnErrorCode,
    pub message: String,
}

impl AuthnError {
    pub fn new(code: AuthnErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AuthnError> for CommonError {
    fn from(err: AuthnError) -> Self {
        match err.code {
            AuthnErrorCode::UserNotFound => CommonError::not_found(err.message, "user"),
            AuthnErrorCode::AuthenticationFailed => CommonError::authentication(err.message),
            AuthnErrorCode::NotImplemented => CommonError::invalid_request(err.message),
            AuthnErrorCode::SystemError => CommonError::Unknown(anyhow::anyhow!(err.message)),
        }
    }
}

/// Wire shape POSTed to a REST delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Identifying attributes, e.g. `{"username": "jdoe"}`.
    pub identifiers: Map<String, Value>,
    /// Credentials by kind, e.g. `{"password": "..."}`.
    pub credentials: std::collections::HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnResponse {
    pub user_id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Configuration selecting the provider variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthnProviderConfig {
    Default,
    Rest {
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Disabled,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Closed set of authentication providers.
#[derive(Clone)]
pub enum AuthnProvider {
    Default(DefaultAuthnProvider),
    Rest(RestAuthnProvider),
    Disabled,
}

impl AuthnProvider {
    pub fn from_config(
        config: &AuthnProviderConfig,
        users: UserService,
    ) -> Result<Self, CommonError> {
        match config {
            AuthnProviderConfig::Default => {
                Ok(AuthnProvider::Default(DefaultAuthnProvider { users }))
            }
            AuthnProviderConfig::Rest {
                url,
                api_key,
                timeout_secs,
            } => Ok(AuthnProvider::Rest(RestAuthnProvider::new(
                url.clone(),
                api_key.clone(),
                Duration::from_secs(*timeout_secs),
            )?)),
            AuthnProviderConfig::Disabled => Ok(AuthnProvider::Disabled),
        }
    }

    pub async fn authenticate(&self, request: &AuthnRequest) -> Result<AuthnResponse, AuthnError> {
        match self {
            AuthnProvider::Default(provider) => provider.authenticate(request).await,
            AuthnProvider::Rest(provider) => provider.authenticate(request).await,
            AuthnProvider::Disabled => Err(AuthnError::new(
                AuthnErrorCode::NotImplemented,
                "authentication is disabled on this deployment",
            )),
        }
    }

    /// All attributes of the user, or the requested subset.
    pub async fn get_attributes(
        &self,
        user_id: &str,
        requested: Option<&[String]>,
    ) -> Result<Map<String, Value>, AuthnError> {
        match self {
            AuthnProvider::Default(provider) => provider.get_attributes(user_id, requested).await,
            AuthnProvider::Rest(provider) => provider.get_attributes(user_id, requested).await,
            AuthnProvider::Disabled => Err(AuthnError::new(
                AuthnErrorCode::NotImplemented,
                "authentication is disabled on this deployment",
            )),
        }
    }
}

// ============================================================================
// Default provider: the internal user service
// ============================================================================

#[derive(Clone)]
pub struct DefaultAuthnProvider {
    users: UserService,
}

impl DefaultAuthnProvider {
    pub fn new(users: UserService) -> Self {
        Self { users }
    }

    async fn authenticate(&self, request: &AuthnRequest) -> Result<AuthnResponse, AuthnError> {
        let password = request.credentials.get("password").ok_or_else(|| {
            AuthnError::new(
                AuthnErrorCode::AuthenticationFailed,
                "password credential is required",
            )
        })?;

        let user = self
            .users
            .verify_credentials(&request.identifiers, password)
            .await
            .map_err(map_domain_error)?;

        Ok(AuthnResponse {
            user_id: user.id,
            attributes: user.attributes,
        })
    }

    async fn get_attributes(
        &self,
        user_id: &str,
        requested: Option<&[String]>,
    ) -> Result<Map<String, Value>, AuthnError> {
        self.users
            .get_attributes(user_id, requested)
            .await
            .map_err(map_domain_error)
    }
}

fn map_domain_error(err: CommonError) -> AuthnError {
    match err {
        CommonError::NotFound { msg, .. } => AuthnError::new(AuthnErrorCode::UserNotFound, msg),
        CommonError::Authentication { msg, .. } => {
            AuthnError::new(AuthnErrorCode::AuthenticationFailed, msg)
        }
        other => AuthnError::new(AuthnErrorCode::SystemError, other.to_string()),
    }
}

// ============================================================================
// REST delegate
// ============================================================================

#[derive(Clone)]
pub struct RestAuthnProvider {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RestAuthnProvider {
    pub fn new(
        url: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CommonError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to build client: {e}")))?;
        Ok(Self {
            url,
            api_key,
            client,
        })
    }

    async fn authenticate(&self, request: &AuthnRequest) -> Result<AuthnResponse, AuthnError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder.send().await.map_err(|e| {
            AuthnError::new(
                AuthnErrorCode::SystemError,
                format!("authentication delegate unreachable: {e}"),
            )
        })?;

        if response.status().is_success() {
            return response.json::<AuthnResponse>().await.map_err(|e| {
                AuthnError::new(
                    AuthnErrorCode::SystemError,
                    format!("malformed delegate response: {e}"),
                )
            });
        }

        let body = response.bytes().await.unwrap_or_default();
        Err(decode_provider_error(&body))
    }

    async fn get_attributes(
        &self,
        user_id: &str,
        requested: Option<&[String]>,
    ) -> Result<Map<String, Value>, AuthnError> {
        let mut builder = self
            .client
            .get(format!("{}/{}", self.url.trim_end_matches('/'), user_id));
        if let Some(names) = requested {
            builder = builder.query(&[("attributes", names.join(","))]);
        }
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        let response = builder.send().await.map_err(|e| {
            AuthnError::new(
                AuthnErrorCode::SystemError,
                format!("authentication delegate unreachable: {e}"),
            )
        })?;

        if response.status().is_success() {
            return response.json::<Map<String, Value>>().await.map_err(|e| {
                AuthnError::new(
                    AuthnErrorCode::SystemError,
                    format!("malformed delegate response: {e}"),
                )
            });
        }

        let body = response.bytes().await.unwrap_or_default();
        Err(decode_provider_error(&body))
    }
}

/// A non-200 delegate response body is expected to be an [`AuthnError`];
/// anything else degrades to a system error.
fn decode_provider_error(body: &[u8]) -> AuthnError {
    serde_json::from_slice::<AuthnError>(body).unwrap_or_else(|_| {
        AuthnError::new(
            AuthnErrorCode::SystemError,
            "authentication delegate returned an unrecognized error",
        )
    })
}
