//! The userinfo endpoint: claim assembly from the access token, the
//! application configuration and the user store.

use serde_json::{Map, Value, json};
use shared::error::CommonError;

use crate::OAuthService;
use crate::claims::{ClaimsRequest, resolve_userinfo_claims};
use crate::token::GRANT_CLIENT_CREDENTIALS;

impl OAuthService {
    /// Build the userinfo response for a bearer access token.
    pub async fn userinfo(&self, bearer_token: &str) -> Result<Map<String, Value>, CommonError> {
        // Signature and lifetime first; issuer/audience vary per app and
        // are resolved from the verified claims below.
        let claims = self.jwt.verify(bearer_token, None, None)?;

        if claims.get("grant_type").and_then(Value::as_str) == Some(GRANT_CLIENT_CREDENTIALS) {
            return Err(CommonError::authorization(
                "tokens issued via client_credentials are not supported by userinfo",
            ));
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CommonError::authentication("invalid_token: missing subject"))?
            .to_string();

        let scopes: Vec<String> = claims
            .get("scope")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !scopes.iter().any(|s| s == "openid") {
            return Err(CommonError::authorization(
                "insufficient_scope: the openid scope is required",
            ));
        }

        let client_id = claims
            .get("client_id")
            .or_else(|| claims.get("aud"))
            .and_then(Value::as_str)
            .ok_or_else(|| CommonError::authentication("invalid_token: missing audience"))?;
        let application = self
            .applications
            .get_by_client_id(client_id)
            .await?
            .ok_or_else(|| CommonError::authentication("invalid_token: unknown client"))?;

        // Issuer binding: the token must have been minted for this app's
        // configured issuer.
        if claims.get("iss").and_then(Value::as_str)
            != Some(self.issuer_for(&application).as_str())
        {
            return Err(CommonError::authentication("invalid_token: wrong issuer"));
        }

        let claims_request: Option<ClaimsRequest> = claims
            .get("claims_request")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok());

        let user_attributes = self.users.get_attributes(&subject, None).await?;

        let mut response = Map::new();
        response.insert("sub".to_string(), json!(subject));
        for (name, value) in resolve_userinfo_claims(
            &application,
            &scopes,
            claims_request.as_ref(),
            &user_attributes,
        ) {
            response.insert(name, value);
        }

        Ok(response)
    }
}
