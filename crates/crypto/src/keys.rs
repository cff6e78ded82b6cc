//! Process-held signing and decryption key material.
//!
//! Keys are loaded (or generated) once at startup and are immutable for the
//! process lifetime. Every other service receives an `Arc<KeyService>`.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use shared::codec::{b64url_encode, sha256};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

/// A public key in JWK form, as published by `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Which of the two held keys signs by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredKey {
    Rsa,
    Ec,
}

pub struct KeyService {
    rsa_private: RsaPrivateKey,
    rsa_kid: String,
    rsa_encoding: EncodingKey,
    rsa_decoding: DecodingKey,
    ec_private: p256::SecretKey,
    ec_kid: String,
    ec_encoding: EncodingKey,
    ec_decoding: DecodingKey,
    certificate_thumbprint: Option<String>,
    preferred: PreferredKey,
    jwks: JwkSet,
}

impl KeyService {
    /// Build the service from already-parsed private keys.
    ///
    /// `certificate_der` is hashed into the SHA-256 thumbprint when present.
    pub fn new(
        rsa_private: RsaPrivateKey,
        ec_private: p256::SecretKey,
        certificate_der: Option<&[u8]>,
        preferred: PreferredKey,
    ) -> Result<Self, CommonError> {
        let rsa_kid = Uuid::new_v4().to_string();
        let ec_kid = Uuid::new_v4().to_string();

        let rsa_pem = rsa_private
            .to_pkcs8_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to encode RSA key: {e}")))?;
        let rsa_encoding = EncodingKey::from_rsa_pem(rsa_pem.as_bytes())
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to load RSA key: {e}")))?;

        let rsa_public = RsaPublicKey::from(&rsa_private);
        let rsa_public_pem = rsa_public.to_public_key_pem(pkcs8::LineEnding::LF).map_err(
            |e| CommonError::Unknown(anyhow::anyhow!("failed to encode RSA public key: {e}")),
        )?;
        let rsa_decoding = DecodingKey::from_rsa_pem(rsa_public_pem.as_bytes()).map_err(|e| {
            CommonError::Unknown(anyhow::anyhow!("failed to load RSA public key: {e}"))
        })?;

        let ec_pem = ec_private
            .to_pkcs8_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to encode EC key: {e}")))?;
        let ec_encoding = EncodingKey::from_ec_pem(ec_pem.as_bytes())
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to load EC key: {e}")))?;

        let ec_public = ec_private.public_key();
        let ec_public_pem = ec_public.to_public_key_pem(pkcs8::LineEnding::LF).map_err(
            |e| CommonError::Unknown(anyhow::anyhow!("failed to encode EC public key: {e}")),
        )?;
        let ec_decoding = DecodingKey::from_ec_pem(ec_public_pem.as_bytes()).map_err(|e| {
            CommonError::Unknown(anyhow::anyhow!("failed to load EC public key: {e}"))
        })?;

        let certificate_thumbprint = certificate_der.map(|der| b64url_encode(sha256(der)));

        let jwks = JwkSet {
            keys: vec![
                rsa_public_to_jwk(&rsa_public, &rsa_kid),
                ec_public_to_jwk(&ec_public, &ec_kid),
            ],
        };

        Ok(Self {
            rsa_private,
            rsa_kid,
            rsa_encoding,
            rsa_decoding,
            ec_private,
            ec_kid,
            ec_encoding,
            ec_decoding,
            certificate_thumbprint,
            preferred,
            jwks,
        })
    }

    /// Load keys from PEM strings (PKCS#8 or PKCS#1/SEC1).
    pub fn from_pem(
        rsa_private_pem: &str,
        ec_private_pem: &str,
        certificate_der: Option<&[u8]>,
        preferred: PreferredKey,
    ) -> Result<Self, CommonError> {
        let rsa_private = RsaPrivateKey::from_pkcs8_pem(rsa_private_pem)
            .or_else(|_| {
                use pkcs1::DecodeRsaPrivateKey;
                RsaPrivateKey::from_pkcs1_pem(rsa_private_pem)
            })
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse RSA key: {e}")))?;
        let ec_private = p256::SecretKey::from_pkcs8_pem(ec_private_pem)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to parse EC key: {e}")))?;
        Self::new(rsa_private, ec_private, certificate_der, preferred)
    }

    /// Generate a fresh key pair set. Used at first boot and in tests.
    pub fn generate(preferred: PreferredKey) -> Result<Self, CommonError> {
        let rsa_private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to generate RSA key: {e}")))?;
        let ec_private = p256::SecretKey::random(&mut rand::rngs::OsRng);
        Self::new(rsa_private, ec_private, None, preferred)
    }

    /// The kid/alg/encoding-key triple used for signing.
    pub fn signing_material(&self) -> (&str, Algorithm, &EncodingKey) {
        match self.preferred {
            PreferredKey::Rsa => (&self.rsa_kid, Algorithm::RS256, &self.rsa_encoding),
            PreferredKey::Ec => (&self.ec_kid, Algorithm::ES256, &self.ec_encoding),
        }
    }

    /// Resolve a `kid` from a token header to its verification key.
    pub fn decoding_key(&self, kid: &str) -> Option<(Algorithm, &DecodingKey)> {
        if kid == self.rsa_kid {
            Some((Algorithm::RS256, &self.rsa_decoding))
        } else if kid == self.ec_kid {
            Some((Algorithm::ES256, &self.ec_decoding))
        } else {
            None
        }
    }

    pub fn preferred_kid(&self) -> &str {
        match self.preferred {
            PreferredKey::Rsa => &self.rsa_kid,
            PreferredKey::Ec => &self.ec_kid,
        }
    }

    /// RSA private key, used by the JWE service for RSA-OAEP-256 decryption.
    pub fn rsa_private(&self) -> &RsaPrivateKey {
        &self.rsa_private
    }

    /// EC P-256 private key, used by the JWE service for ECDH-ES decryption.
    pub fn ec_private(&self) -> &p256::SecretKey {
        &self.ec_private
    }

    pub fn certificate_thumbprint(&self) -> Option<&str> {
        self.certificate_thumbprint.as_deref()
    }

    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }
}

fn rsa_public_to_jwk(public_key: &RsaPublicKey, kid: &str) -> Jwk {
    Jwk {
        kty: "RSA".to_string(),
        kid: kid.to_string(),
        use_: "sig".to_string(),
        alg: "RS256".to_string(),
        n: Some(b64url_encode(public_key.n().to_bytes_be())),
        e: Some(b64url_encode(public_key.e().to_bytes_be())),
        crv: None,
        x: None,
        y: None,
    }
}

fn ec_public_to_jwk(public_key: &p256::PublicKey, kid: &str) -> Jwk {
    use elliptic_curve::sec1::ToEncodedPoint;

    let point = public_key.to_encoded_point(false);
    Jwk {
        kty: "EC".to_string(),
        kid: kid.to_string(),
        use_: "sig".to_string(),
        alg: "ES256".to_string(),
        n: None,
        e: None,
        crv: Some("P-256".to_string()),
        x: point.x().map(b64url_encode),
        y: point.y().map(b64url_encode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_publishes_both_jwks() {
        let service = KeyService::generate(PreferredKey::Rsa).unwrap();
        let jwks = service.jwks();
        assert_eq!(jwks.keys.len(), 2);

        let rsa = jwks.keys.iter().find(|k| k.kty == "RSA").unwrap();
        assert_eq!(rsa.alg, "RS256");
        assert!(rsa.n.is_some() && rsa.e.is_some());

        let ec = jwks.keys.iter().find(|k| k.kty == "EC").unwrap();
        assert_eq!(ec.alg, "ES256");
        assert_eq!(ec.crv.as_deref(), Some("P-256"));
        assert!(ec.x.is_some() && ec.y.is_some());
    }

    #[test]
    fn test_kid_resolution() {
        let service = KeyService::generate(PreferredKey::Ec).unwrap();
        let (kid, alg, _) = service.signing_material();
        assert_eq!(alg, Algorithm::ES256);
        assert!(service.decoding_key(kid).is_some());
        assert!(service.decoding_key("unknown-kid").is_none());
    }

    #[test]
    fn test_thumbprint_only_with_certificate() {
        let service = KeyService::generate(PreferredKey::Rsa).unwrap();
        assert!(service.certificate_thumbprint().is_none());

        let rsa = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let ec = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let with_cert =
            KeyService::new(rsa, ec, Some(b"fake-der-certificate"), PreferredKey::Rsa).unwrap();
        let thumbprint = with_cert.certificate_thumbprint().unwrap();
        assert_eq!(thumbprint, b64url_encode(sha256(b"fake-der-certificate")));
    }
}
