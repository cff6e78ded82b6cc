//! The token endpoint: authorization_code, refresh_token and
//! client_credentials grants.

use chrono::Utc;
use resources::application::{Application, GrantType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use shared::codec::{b64url_encode, constant_time_eq, sha256};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::OAuthService;
use crate::claims::ClaimsRequest;
use crate::codes::RefreshTokenData;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

impl OAuthService {
    pub async fn token(&self, request: TokenRequest) -> Result<TokenResponse, CommonError> {
        let client_id = request
            .client_id
            .clone()
            .ok_or_else(|| CommonError::authentication("invalid_client"))?;
        let client_secret = request.client_secret.clone().unwrap_or_default();

        // Constant-time client authentication against the stored hash.
        let application = self
            .applications
            .validate_credentials(&client_id, &client_secret)
            .await
            .map_err(|_| CommonError::authentication("invalid_client"))?;

        match request.grant_type.as_str() {
            GRANT_AUTHORIZATION_CODE => self.authorization_code_grant(&application, request).await,
            GRANT_REFRESH_TOKEN => self.refresh_token_grant(&application, request).await,
            GRANT_CLIENT_CREDENTIALS => self.client_credentials_grant(&application, request).await,
            other => Err(CommonError::invalid_request(format!(
                "unsupported grant_type '{other}'"
            ))),
        }
    }

    async fn authorization_code_grant(
        &self,
        application: &Application,
        request: TokenRequest,
    ) -> Result<TokenResponse, CommonError> {
        if !application.supports_grant(GrantType::AuthorizationCode) {
            return Err(CommonError::invalid_request(
                "invalid_grant: grant type not allowed for this client",
            ));
        }

        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CommonError::invalid_request("invalid_grant: code is required"))?;

        // Atomic consumption: a replayed code fails here.
        let data = self
            .codes
            .consume(code)
            .ok_or_else(|| CommonError::invalid_request("invalid_grant"))?;

        if data.client_id != application.client_id {
            return Err(CommonError::invalid_request("invalid_grant"));
        }
        if request.redirect_uri.as_deref() != Some(data.redirect_uri.as_str()) {
            return Err(CommonError::invalid_request(
                "invalid_grant: redirect_uri mismatch",
            ));
        }
        verify_pkce(&data.code_challenge, &data.code_challenge_method, &request)?;

        let user_attributes = self.users.get_attributes(&data.user_id, None).await?;

        let access_token = self.sign_access_token(
            application,
            &data.user_id,
            &data.scopes,
            GRANT_AUTHORIZATION_CODE,
            data.claims_request.as_ref(),
            &user_attributes,
        )?;

        let id_token = if data.scopes.iter().any(|s| s == "openid") {
            Some(self.sign_id_token(
                application,
                &data.user_id,
                data.nonce.as_deref(),
                data.authenticated_at.timestamp(),
                &user_attributes,
            )?)
        } else {
            None
        };

        let refresh_token = if application.supports_grant(GrantType::RefreshToken) {
            Some(self.refresh_tokens.issue(RefreshTokenData {
                client_id: application.client_id.clone(),
                user_id: data.user_id.clone(),
                scopes: data.scopes.clone(),
                claims_request: data.claims_request.clone(),
                expires_at: Utc::now(),
            }))
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: application.token_config.access_token.validity_seconds,
            refresh_token,
            id_token,
            scope: data.scopes.join(" "),
        })
    }

    async fn refresh_token_grant(
        &self,
        application: &Application,
        request: TokenRequest,
    ) -> Result<TokenResponse, CommonError> {
        if !application.supports_grant(GrantType::RefreshToken) {
            return Err(CommonError::invalid_request(
                "invalid_grant: grant type not allowed for this client",
            ));
        }

        let presented = request
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CommonError::invalid_request("invalid_grant: refresh_token is required")
            })?;

        let data = self
            .refresh_tokens
            .consume(presented)
            .ok_or_else(|| CommonError::invalid_request("invalid_grant"))?;
        if data.client_id != application.client_id {
            return Err(CommonError::invalid_request("invalid_grant"));
        }

        let user_attributes = self.users.get_attributes(&data.user_id, None).await?;
        let access_token = self.sign_access_token(
            application,
            &data.user_id,
            &data.scopes,
            GRANT_REFRESH_TOKEN,
            data.claims_request.as_ref(),
            &user_attributes,
        )?;

        let rotated = self.refresh_tokens.issue(RefreshTokenData {
            client_id: data.client_id.clone(),
            user_id: data.user_id.clone(),
            scopes: data.scopes.clone(),
            claims_request: data.claims_request.clone(),
            expires_at: Utc::now(),
        });

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: application.token_config.access_token.validity_seconds,
            refresh_token: Some(rotated),
            id_token: None,
            scope: data.scopes.join(" "),
        })
    }

    async fn client_credentials_grant(
        &self,
        application: &Application,
        request: TokenRequest,
    ) -> Result<TokenResponse, CommonError> {
        if !application.supports_grant(GrantType::ClientCredentials) {
            return Err(CommonError::invalid_request(
                "invalid_grant: grant type not allowed for this client",
            ));
        }

        let scopes: Vec<String> = request
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        // The client itself is the subject; no user attributes exist.
        let access_token = self.sign_access_token(
            application,
            &application.client_id,
            &scopes,
            GRANT_CLIENT_CREDENTIALS,
            None,
            &Map::new(),
        )?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: application.token_config.access_token.validity_seconds,
            refresh_token: None,
            id_token: None,
            scope: scopes.join(" "),
        })
    }

    pub(crate) fn issuer_for(&self, application: &Application) -> String {
        application
            .token_config
            .issuer
            .clone()
            .unwrap_or_else(|| self.config.issuer.clone())
    }

    fn sign_access_token(
        &self,
        application: &Application,
        subject: &str,
        scopes: &[String],
        grant_type: &str,
        claims_request: Option<&ClaimsRequest>,
        user_attributes: &Map<String, Value>,
    ) -> Result<String, CommonError> {
        let now = Utc::now().timestamp();
        let validity = application.token_config.access_token.validity_seconds;

        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.issuer_for(application)));
        claims.insert("sub".to_string(), json!(subject));
        claims.insert("aud".to_string(), json!(application.client_id));
        claims.insert("iat".to_string(), json!(now));
        claims.insert("nbf".to_string(), json!(now));
        claims.insert("exp".to_string(), json!(now + validity));
        claims.insert("jti".to_string(), json!(Uuid::new_v4().to_string()));
        claims.insert("client_id".to_string(), json!(application.client_id));
        claims.insert("scope".to_string(), json!(scopes.join(" ")));
        claims.insert("grant_type".to_string(), json!(grant_type));

        // Configured user attributes ride inside the access token.
        for name in &application.token_config.access_token.user_attributes {
            if let Some(value) = user_attributes.get(name) {
                claims.insert(name.clone(), value.clone());
            }
        }

        // The userinfo half of the claims request travels with the token
        // so the userinfo endpoint can honor it later.
        if let Some(request) = claims_request
            && !request.is_empty()
        {
            claims.insert("claims_request".to_string(), serde_json::to_value(request)?);
        }

        self.jwt.sign(&Value::Object(claims))
    }

    fn sign_id_token(
        &self,
        application: &Application,
        subject: &str,
        nonce: Option<&str>,
        auth_time: i64,
        user_attributes: &Map<String, Value>,
    ) -> Result<String, CommonError> {
        let now = Utc::now().timestamp();
        let validity = application.token_config.id_token.validity_seconds;

        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.issuer_for(application)));
        claims.insert("sub".to_string(), json!(subject));
        claims.insert("aud".to_string(), json!(application.client_id));
        claims.insert("iat".to_string(), json!(now));
        claims.insert("exp".to_string(), json!(now + validity));
        claims.insert("auth_time".to_string(), json!(auth_time));
        if let Some(nonce) = nonce {
            claims.insert("nonce".to_string(), json!(nonce));
        }
        for name in &application.token_config.id_token.user_attributes {
            if let Some(value) = user_attributes.get(name) {
                claims.insert(name.clone(), value.clone());
            }
        }

        self.jwt.sign(&Value::Object(claims))
    }
}

fn verify_pkce(
    stored_challenge: &Option<String>,
    stored_method: &Option<String>,
    request: &TokenRequest,
) -> Result<(), CommonError> {
    let Some(challenge) = stored_challenge else {
        return Ok(());
    };

    let verifier = request
        .code_verifier
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            CommonError::invalid_request("invalid_grant: code_verifier is required")
        })?;

    let matches = match stored_method.as_deref() {
        Some("S256") => {
            let computed = b64url_encode(sha256(verifier.as_bytes()));
            constant_time_eq(computed.as_bytes(), challenge.as_bytes())
        }
        _ => constant_time_eq(verifier.as_bytes(), challenge.as_bytes()),
    };

    if !matches {
        return Err(CommonError::invalid_request(
            "invalid_grant: PKCE verification failed",
        ));
    }
    Ok(())
}
