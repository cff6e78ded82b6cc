//! JWS signing and verification over the process key material.

use std::sync::Arc;

use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde_json::Value;
use shared::codec::b64url_decode;
use shared::error::CommonError;

use crate::keys::KeyService;

/// Optional header overrides for [`JwtService::sign_with`].
#[derive(Debug, Default, Clone)]
pub struct HeaderOverrides {
    /// Replaces the default `typ: JWT`.
    pub typ: Option<String>,
    /// Extra `cty` header value.
    pub cty: Option<String>,
}

#[derive(Clone)]
pub struct JwtService {
    keys: Arc<KeyService>,
    /// Clock-skew allowance in seconds applied to `exp`/`nbf`.
    leeway: u64,
}

impl JwtService {
    pub fn new(keys: Arc<KeyService>, leeway: u64) -> Self {
        Self { keys, leeway }
    }

    pub fn keys(&self) -> &Arc<KeyService> {
        &self.keys
    }

    /// Sign `claims` into a compact JWS with the preferred process key.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, CommonError> {
        self.sign_with(claims, HeaderOverrides::default())
    }

    pub fn sign_with<T: Serialize>(
        &self,
        claims: &T,
        overrides: HeaderOverrides,
    ) -> Result<String, CommonError> {
        let (kid, alg, encoding_key) = self.keys.signing_material();

        let mut header = Header::new(alg);
        header.kid = Some(kid.to_string());
        header.typ = Some(overrides.typ.unwrap_or_else(|| "JWT".to_string()));
        header.cty = overrides.cty;

        encode(&header, claims, encoding_key)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to sign JWT: {e}")))
    }

    /// Verify a compact JWS: resolves `kid`, checks the signature and the
    /// `iss`/`aud`/`exp`/`nbf` claims within the configured leeway.
    pub fn verify(
        &self,
        token: &str,
        expected_iss: Option<&str>,
        expected_aud: Option<&str>,
    ) -> Result<Value, CommonError> {
        let header = decode_header(token).map_err(|e| CommonError::Authentication {
            msg: format!("invalid_token: malformed header: {e}"),
            source: None,
        })?;

        let kid = header.kid.ok_or_else(|| {
            CommonError::authentication("invalid_token: missing 'kid' in header")
        })?;

        let (alg, decoding_key) =
            self.keys
                .decoding_key(&kid)
                .ok_or_else(|| CommonError::Authentication {
                    msg: format!("invalid_token: unknown signing key '{kid}'"),
                    source: None,
                })?;

        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        match expected_iss {
            Some(iss) => validation.set_issuer(&[iss]),
            None => {
                validation.iss = None;
            }
        }
        match expected_aud {
            Some(aud) => validation.set_audience(&[aud]),
            None => {
                validation.validate_aud = false;
            }
        }

        let data = decode::<Value>(token, decoding_key, &validation).map_err(|e| {
            CommonError::Authentication {
                msg: format!("invalid_token: {e}"),
                source: None,
            }
        })?;

        Ok(data.claims)
    }

    /// Decode the payload segment WITHOUT verifying the signature.
    pub fn decode_payload(token: &str) -> Result<Value, CommonError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| CommonError::invalid_request("malformed compact JWS"))?;
        let bytes = b64url_decode(payload)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CommonError::invalid_request(format!("malformed JWS payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PreferredKey;
    use serde_json::json;

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn service(preferred: PreferredKey) -> JwtService {
        let keys = Arc::new(KeyService::generate(preferred).unwrap());
        JwtService::new(keys, 30)
    }

    #[test]
    fn test_sign_verify_roundtrip_rs256() {
        let jwt = service(PreferredKey::Rsa);
        let claims = json!({
            "sub": "user-1",
            "iss": "https://issuer.example",
            "aud": "cid",
            "iat": now(),
            "exp": now() + 300,
        });

        let token = jwt.sign(&claims).unwrap();
        let decoded = jwt
            .verify(&token, Some("https://issuer.example"), Some("cid"))
            .unwrap();
        assert_eq!(decoded["sub"], "user-1");
    }

    #[test]
    fn test_sign_verify_roundtrip_es256() {
        let jwt = service(PreferredKey::Ec);
        let claims = json!({
            "sub": "user-2",
            "iss": "https://issuer.example",
            "aud": "cid",
            "exp": now() + 300,
        });

        let token = jwt.sign(&claims).unwrap();
        assert!(token.starts_with("eyJ"));
        let decoded = jwt
            .verify(&token, Some("https://issuer.example"), Some("cid"))
            .unwrap();
        assert_eq!(decoded["sub"], "user-2");
    }

    #[test]
    fn test_verify_rejects_expired_outside_leeway() {
        let jwt = service(PreferredKey::Rsa);
        let claims = json!({
            "sub": "user-1",
            "iss": "iss",
            "aud": "aud",
            "exp": now() - 120,
        });
        let token = jwt.sign(&claims).unwrap();
        let err = jwt.verify(&token, Some("iss"), Some("aud")).unwrap_err();
        assert!(matches!(err, CommonError::Authentication { .. }));
    }

    #[test]
    fn test_verify_accepts_expired_within_leeway() {
        let jwt = service(PreferredKey::Rsa);
        let claims = json!({
            "sub": "user-1",
            "iss": "iss",
            "aud": "aud",
            "exp": now() - 10,
        });
        let token = jwt.sign(&claims).unwrap();
        jwt.verify(&token, Some("iss"), Some("aud")).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_audience() {
        let jwt = service(PreferredKey::Rsa);
        let claims = json!({"sub": "u", "iss": "iss", "aud": "aud", "exp": now() + 60});
        let token = jwt.sign(&claims).unwrap();
        assert!(jwt.verify(&token, Some("iss"), Some("other")).is_err());
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let jwt_a = service(PreferredKey::Rsa);
        let jwt_b = service(PreferredKey::Rsa);
        let claims = json!({"sub": "u", "iss": "iss", "aud": "aud", "exp": now() + 60});
        let token = jwt_a.sign(&claims).unwrap();
        // jwt_b holds different keys, so the kid cannot resolve.
        assert!(jwt_b.verify(&token, Some("iss"), Some("aud")).is_err());
    }

    #[test]
    fn test_decode_payload_does_not_verify() {
        let jwt = service(PreferredKey::Rsa);
        let claims = json!({"sub": "u", "iss": "iss", "aud": "aud", "exp": now() - 9999});
        let token = jwt.sign(&claims).unwrap();
        // Expired, but decode_payload still returns the claims.
        let payload = JwtService::decode_payload(&token).unwrap();
        assert_eq!(payload["sub"], "u");
    }
}
