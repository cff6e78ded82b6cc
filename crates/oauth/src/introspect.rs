//! RFC 7662 token introspection. Any verification failure yields
//! `active: false` rather than an error.

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::OAuthService;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            sub: None,
            token_type: None,
            exp: None,
            iat: None,
            iss: None,
        }
    }
}

impl OAuthService {
    pub fn introspect(&self, token: &str) -> IntrospectionResponse {
        let claims = match self.jwt.verify(token, None, None) {
            Ok(claims) => claims,
            Err(_) => return IntrospectionResponse::inactive(),
        };

        IntrospectionResponse {
            active: true,
            scope: claims
                .get("scope")
                .and_then(Value::as_str)
                .map(str::to_string),
            client_id: claims
                .get("client_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            sub: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            token_type: Some("Bearer".to_string()),
            exp: claims.get("exp").and_then(Value::as_i64),
            iat: claims.get("iat").and_then(Value::as_i64),
            iss: claims.get("iss").and_then(Value::as_str).map(str::to_string),
        }
    }
}
