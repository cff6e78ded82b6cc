//! OAuth application registry: model, validation rules and client
//! authentication.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::codec::{b64url_encode, constant_time_eq, random_bytes, sha256_hex};
use shared::error::CommonError;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{
    CompositeStore, FileStore, Resource, ResourceReader, ResourceStore, impl_resource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

/// Per-token-kind settings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenSettings {
    /// Lifetime in seconds.
    pub validity_seconds: i64,
    /// User attributes copied into the token.
    #[serde(default)]
    pub user_attributes: Vec<String>,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            validity_seconds: 3600,
            user_attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    /// Overrides the server issuer when set.
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub access_token: TokenSettings,
    #[serde(default)]
    pub id_token: TokenSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoConfig {
    /// User attributes the userinfo endpoint may expose.
    #[serde(default)]
    pub user_attributes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub client_id: String,
    /// SHA-256 thumbprint of the client secret; never the secret itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub response_types: Vec<ResponseType>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[serde(default)]
    pub pkce_required: bool,
    #[serde(default)]
    pub public_client: bool,
    #[serde(default)]
    pub token_config: TokenConfig,
    #[serde(default)]
    pub user_info: UserInfoConfig,
    /// scope → claim names emitted for that scope.
    #[serde(default)]
    pub scope_claims: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub allowed_user_types: Vec<String>,
    #[serde(default)]
    pub theme_id: Option<String>,
    #[serde(default)]
    pub layout_id: Option<String>,
    #[serde(default)]
    pub auth_flow_id: Option<String>,
    #[serde(default)]
    pub registration_flow_id: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(Application);

impl Application {
    /// Public clients always use PKCE regardless of the stored flag.
    pub fn requires_pkce(&self) -> bool {
        self.pkce_required || self.public_client
    }

    pub fn supports_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }
}

/// Creation/update payload. The client secret travels in plaintext exactly
/// once, in the response of the call that produced it.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub client_id: String,
    /// Optional caller-chosen secret; generated when absent for
    /// confidential clients.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub response_types: Vec<ResponseType>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[serde(default)]
    pub pkce_required: bool,
    #[serde(default)]
    pub public_client: bool,
    #[serde(default)]
    pub token_config: TokenConfig,
    #[serde(default)]
    pub user_info: UserInfoConfig,
    #[serde(default)]
    pub scope_claims: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub allowed_user_types: Vec<String>,
    #[serde(default)]
    pub theme_id: Option<String>,
    #[serde(default)]
    pub layout_id: Option<String>,
    #[serde(default)]
    pub auth_flow_id: Option<String>,
    #[serde(default)]
    pub registration_flow_id: Option<String>,
}

#[derive(Clone)]
pub struct ApplicationService {
    store: CompositeStore<Application>,
}

impl ApplicationService {
    pub fn new(store: CompositeStore<Application>) -> Self {
        Self { store }
    }

    pub fn from_file_store(file: FileStore<Application>) -> Self {
        Self::new(CompositeStore::with_file_store(file))
    }

    /// Create an application. Returns the stored entity and, when a secret
    /// was generated or supplied, its plaintext.
    pub async fn create(
        &self,
        request: ApplicationRequest,
    ) -> Result<(Application, Option<String>), CommonError> {
        validate_request(&request)?;

        if self.store.get_by_name(&request.name).await?.is_some() {
            return Err(CommonError::conflict(format!(
                "application named '{}' already exists",
                request.name
            )));
        }
        if self.get_by_client_id(&request.client_id).await?.is_some() {
            return Err(CommonError::conflict(format!(
                "client_id '{}' already registered",
                request.client_id
            )));
        }

        let (hashed_client_secret, plaintext_secret) = derive_secret(&request)?;

        let application = Application {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            client_id: request.client_id,
            hashed_client_secret,
            redirect_uris: request.redirect_uris,
            grant_types: request.grant_types,
            response_types: request.response_types,
            token_endpoint_auth_method: request.token_endpoint_auth_method,
            pkce_required: request.pkce_required,
            public_client: request.public_client,
            token_config: request.token_config,
            user_info: request.user_info,
            scope_claims: request.scope_claims,
            allowed_user_types: request.allowed_user_types,
            theme_id: request.theme_id,
            layout_id: request.layout_id,
            auth_flow_id: request.auth_flow_id,
            registration_flow_id: request.registration_flow_id,
            read_only: false,
        };

        let stored = self.store.create(application).await?;
        tracing::info!(application_id = %stored.id, client_id = %stored.client_id, "application created");
        Ok((stored, plaintext_secret))
    }

    pub async fn update(
        &self,
        id: &str,
        request: ApplicationRequest,
    ) -> Result<(Application, Option<String>), CommonError> {
        validate_request(&request)?;

        let existing = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("application not found", id))?;
        if existing.is_read_only() {
            return Err(CommonError::invalid_request(
                "file-defined applications cannot be modified",
            ));
        }

        // Renames may not collide with another application.
        if let Some(other) = self.store.get_by_name(&request.name).await?
            && other.id != id
        {
            return Err(CommonError::conflict(format!(
                "application named '{}' already exists",
                request.name
            )));
        }
        if let Some(other) = self.get_by_client_id(&request.client_id).await?
            && other.id != id
        {
            return Err(CommonError::conflict(format!(
                "client_id '{}' already registered",
                request.client_id
            )));
        }

        // Absent secret keeps the stored hash.
        let (hashed_client_secret, plaintext_secret) = match &request.client_secret {
            Some(_) => derive_secret(&request)?,
            None => (existing.hashed_client_secret.clone(), None),
        };

        let application = Application {
            id: id.to_string(),
            name: request.name,
            description: request.description,
            client_id: request.client_id,
            hashed_client_secret,
            redirect_uris: request.redirect_uris,
            grant_types: request.grant_types,
            response_types: request.response_types,
            token_endpoint_auth_method: request.token_endpoint_auth_method,
            pkce_required: request.pkce_required,
            public_client: request.public_client,
            token_config: request.token_config,
            user_info: request.user_info,
            scope_claims: request.scope_claims,
            allowed_user_types: request.allowed_user_types,
            theme_id: request.theme_id,
            layout_id: request.layout_id,
            auth_flow_id: request.auth_flow_id,
            registration_flow_id: request.registration_flow_id,
            read_only: false,
        };

        let stored = self.store.update(application).await?;
        Ok((stored, plaintext_secret))
    }

    /// Idempotent delete: a miss is success.
    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        if let Some(existing) = self.store.get_by_id(id).await?
            && existing.is_read_only()
        {
            return Err(CommonError::invalid_request(
                "file-defined applications cannot be deleted",
            ));
        }
        self.store.delete(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Application, CommonError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("application not found", id))
    }

    pub async fn list(&self) -> Result<Vec<Application>, CommonError> {
        self.store.list().await
    }

    pub async fn get_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<Application>, CommonError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .find(|app| app.client_id == client_id))
    }

    /// Authenticate a client by id and secret. The stored thumbprint is
    /// compared in constant time against the recomputed hash.
    pub async fn validate_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Application, CommonError> {
        let application = self
            .get_by_client_id(client_id)
            .await?
            .ok_or_else(|| CommonError::authentication("invalid client credentials"))?;

        match &application.hashed_client_secret {
            Some(stored_hash) => {
                let computed = sha256_hex(client_secret);
                if !constant_time_eq(computed.as_bytes(), stored_hash.as_bytes()) {
                    return Err(CommonError::authentication("invalid client credentials"));
                }
            }
            None => {
                // Only public clients may authenticate without a secret.
                if !application.public_client || !client_secret.is_empty() {
                    return Err(CommonError::authentication("invalid client credentials"));
                }
            }
        }

        Ok(application)
    }

    /// Resolve the redirect URI an authorization request may use.
    ///
    /// An absent/empty request URI is only accepted when exactly one URI is
    /// registered and that URI is fully qualified. Otherwise the request
    /// URI must match a registered one exactly, and must carry no fragment.
    pub fn validate_redirect_uri<'a>(
        application: &'a Application,
        requested: Option<&'a str>,
    ) -> Result<&'a str, CommonError> {
        match requested {
            None | Some("") => {
                if application.redirect_uris.len() != 1 {
                    return Err(CommonError::invalid_request(
                        "redirect_uri is required when multiple URIs are registered",
                    ));
                }
                let registered = &application.redirect_uris[0];
                let parsed = Url::parse(registered).map_err(|_| {
                    CommonError::invalid_request("registered redirect URI is not fully qualified")
                })?;
                if parsed.host_str().is_none() {
                    return Err(CommonError::invalid_request(
                        "registered redirect URI is not fully qualified",
                    ));
                }
                Ok(registered.as_str())
            }
            Some(uri) => {
                if uri.contains('#') {
                    return Err(CommonError::invalid_request(
                        "redirect_uri must not contain a fragment",
                    ));
                }
                let parsed = Url::parse(uri).map_err(|_| {
                    CommonError::invalid_request("redirect_uri is not a valid URI")
                })?;
                if parsed.fragment().is_some() {
                    return Err(CommonError::invalid_request(
                        "redirect_uri must not contain a fragment",
                    ));
                }
                if !application.redirect_uris.iter().any(|r| r == uri) {
                    return Err(CommonError::invalid_request(
                        "redirect_uri is not registered for this client",
                    ));
                }
                Ok(uri)
            }
        }
    }
}

fn validate_request(request: &ApplicationRequest) -> Result<(), CommonError> {
    if request.name.is_empty() {
        return Err(CommonError::invalid_request("application name is required"));
    }
    if request.client_id.is_empty() {
        return Err(CommonError::invalid_request("client_id is required"));
    }
    if request.grant_types.is_empty() {
        return Err(CommonError::invalid_request(
            "at least one grant type is required",
        ));
    }
    for uri in &request.redirect_uris {
        if uri.contains('#') {
            return Err(CommonError::invalid_request(format!(
                "redirect URI '{uri}' must not contain a fragment"
            )));
        }
        Url::parse(uri).map_err(|_| {
            CommonError::invalid_request(format!("redirect URI '{uri}' is not a valid URI"))
        })?;
    }
    Ok(())
}

/// Hash the supplied secret, or mint one for confidential clients.
fn derive_secret(
    request: &ApplicationRequest,
) -> Result<(Option<String>, Option<String>), CommonError> {
    if let Some(secret) = &request.client_secret {
        if secret.is_empty() {
            return Err(CommonError::invalid_request("client secret must not be empty"));
        }
        return Ok((Some(sha256_hex(secret)), Some(secret.clone())));
    }
    if request.public_client
        || request.token_endpoint_auth_method == TokenEndpointAuthMethod::None
    {
        return Ok((None, None));
    }
    let secret = b64url_encode(random_bytes::<32>());
    Ok((Some(sha256_hex(&secret)), Some(secret)))
}
