//! Ceremony data model: credentials, session data, authenticator data and
//! the client-facing option objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::codec::b64url_encode;
use utoipa::ToSchema;

use crate::WebAuthnError;
use crate::cose::parse_cose_key;

// Authenticator data flag bits.
pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

/// A registered credential as persisted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Credential {
    /// Credential ID assigned by the authenticator.
    pub id: Vec<u8>,
    /// COSE-encoded public key, stored verbatim.
    pub public_key: Vec<u8>,
    /// Attestation statement format the credential was created with.
    pub attestation_type: String,
    pub authenticator: Authenticator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Authenticator {
    /// 16-byte authenticator model identifier.
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    /// Set when an assertion arrived with a non-increasing counter.
    pub clone_warning: bool,
}

/// The user a ceremony is performed for. Credentials travel with the value;
/// persistence is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnUser {
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
    pub credentials: Vec<Credential>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    Preferred,
    Discouraged,
}

/// Per-ceremony state created by `begin_*` and consumed by `finish_*`.
/// Never reused across ceremonies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// base64url-encoded challenge.
    pub challenge: String,
    pub user_id: Option<Vec<u8>>,
    pub user_verification: UserVerificationRequirement,
    pub expires: DateTime<Utc>,
    pub rp_id: String,
}

impl SessionData {
    pub fn is_expired(&self) -> bool {
        self.expires < Utc::now()
    }
}

/// The `clientDataJSON` document produced by the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub type_: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default, rename = "crossOrigin")]
    pub cross_origin: bool,
}

/// Parsed authenticator data (WebAuthn §6.1).
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: Vec<u8>,
    pub credential_id: Vec<u8>,
    /// COSE key bytes, exactly one CBOR item.
    pub credential_public_key: Vec<u8>,
}

impl AuthenticatorData {
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    pub fn has_attested_credential_data(&self) -> bool {
        self.flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0
    }
}

/// Parse raw authenticator data bytes.
pub fn parse_authenticator_data(data: &[u8]) -> Result<AuthenticatorData, WebAuthnError> {
    if data.len() < 37 {
        return Err(WebAuthnError::InvalidRequest(format!(
            "authenticator data too short: {} bytes",
            data.len()
        )));
    }

    let rp_id_hash: [u8; 32] = data[..32].try_into().unwrap();
    let flags = data[32];
    let sign_count = u32::from_be_bytes(data[33..37].try_into().unwrap());

    let attested_credential_data = if flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
        let rest = &data[37..];
        if rest.len() < 18 {
            return Err(WebAuthnError::InvalidRequest(
                "attested credential data too short".to_string(),
            ));
        }
        let aaguid = rest[..16].to_vec();
        let id_len = u16::from_be_bytes(rest[16..18].try_into().unwrap()) as usize;
        if rest.len() < 18 + id_len {
            return Err(WebAuthnError::InvalidRequest(
                "credential id extends past authenticator data".to_string(),
            ));
        }
        let credential_id = rest[18..18 + id_len].to_vec();

        // The COSE key's length is whatever one CBOR item parse consumes.
        let key_bytes = &rest[18 + id_len..];
        let (_, consumed) = parse_cose_key(key_bytes)?;
        let credential_public_key = key_bytes[..consumed].to_vec();

        Some(AttestedCredentialData {
            aaguid,
            credential_id,
            credential_public_key,
        })
    } else {
        None
    };

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        attested_credential_data,
    })
}

// ============================================================================
// Ceremony responses (already parsed off the wire by the handler layer)
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegistrationResponse {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    /// CBOR attestation object: {fmt, attStmt, authData}.
    pub attestation_object: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AssertionResponse {
    pub raw_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

// ============================================================================
// Client-facing option objects
// ============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url of the user handle.
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialParameter {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    /// base64url credential id.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub user_verification: UserVerificationRequirement,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCreationOptions {
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    /// base64url challenge.
    pub challenge: String,
    pub pub_key_cred_params: Vec<CredentialParameter>,
    pub timeout: u32,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequestOptions {
    /// base64url challenge.
    pub challenge: String,
    pub timeout: u32,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
}

impl CredentialDescriptor {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            type_: "public-key".to_string(),
            id: b64url_encode(&credential.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{authenticator_data_bytes, cose_ec2_key};
    use shared::codec::sha256;

    #[test]
    fn test_parse_authenticator_data_without_attestation() {
        let rp_hash = sha256("login.example");
        let data = authenticator_data_bytes(&rp_hash, FLAG_USER_PRESENT, 7, None);
        let parsed = parse_authenticator_data(&data).unwrap();
        assert_eq!(parsed.rp_id_hash, rp_hash);
        assert!(parsed.user_present());
        assert!(!parsed.user_verified());
        assert_eq!(parsed.sign_count, 7);
        assert!(parsed.attested_credential_data.is_none());
    }

    #[test]
    fn test_parse_authenticator_data_with_attestation() {
        let signing_key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let cose = cose_ec2_key(signing_key.verifying_key());
        let rp_hash = sha256("login.example");
        let data = authenticator_data_bytes(
            &rp_hash,
            FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA,
            0,
            Some((&[0xAA; 16], b"cred-id-001", &cose)),
        );

        let parsed = parse_authenticator_data(&data).unwrap();
        let attested = parsed.attested_credential_data.unwrap();
        assert_eq!(attested.aaguid, vec![0xAA; 16]);
        assert_eq!(attested.credential_id, b"cred-id-001");
        assert_eq!(attested.credential_public_key, cose);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert!(parse_authenticator_data(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_session_expiry() {
        let session = SessionData {
            challenge: "c".to_string(),
            user_id: None,
            user_verification: UserVerificationRequirement::Preferred,
            expires: Utc::now() - chrono::Duration::seconds(1),
            rp_id: "rp".to_string(),
        };
        assert!(session.is_expired());
    }
}
