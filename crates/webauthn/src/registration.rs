//! Registration ceremony: challenge issuance and attestation processing.

use chrono::{Duration, Utc};
use shared::codec::{b64url_encode, constant_time_eq, random_bytes, sha256};

use crate::cbor::decode_first;
use crate::types::{
    AuthenticatorSelection, Authenticator, CollectedClientData, Credential,
    CredentialCreationOptions, CredentialParameter, RegistrationResponse, RelyingPartyEntity,
    SessionData, UserEntity, UserVerificationRequirement, WebAuthnUser,
    parse_authenticator_data,
};
use crate::{RelyingParty, WebAuthnError};

const CHALLENGE_LEN: usize = 32;
const SESSION_TTL_MINUTES: i64 = 5;
const CEREMONY_TIMEOUT_MS: u32 = 60_000;

impl RelyingParty {
    /// Start a registration ceremony: mints a fresh 32-byte challenge and
    /// returns the client options plus the session value to hold until
    /// [`RelyingParty::finish_registration`].
    pub fn begin_registration(
        &self,
        user: &WebAuthnUser,
        user_verification: UserVerificationRequirement,
    ) -> (CredentialCreationOptions, SessionData) {
        let challenge = b64url_encode(random_bytes::<CHALLENGE_LEN>());

        let session = SessionData {
            challenge: challenge.clone(),
            user_id: Some(user.id.clone()),
            user_verification,
            expires: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
            rp_id: self.config().rp_id.clone(),
        };

        let options = CredentialCreationOptions {
            rp: RelyingPartyEntity {
                id: self.config().rp_id.clone(),
                name: self.config().rp_display_name.clone(),
            },
            user: UserEntity {
                id: b64url_encode(&user.id),
                name: user.name.clone(),
                display_name: user.display_name.clone(),
            },
            challenge,
            pub_key_cred_params: vec![
                CredentialParameter {
                    type_: "public-key".to_string(),
                    alg: crate::cose::COSE_ALG_ES256,
                },
                CredentialParameter {
                    type_: "public-key".to_string(),
                    alg: crate::cose::COSE_ALG_RS256,
                },
            ],
            timeout: CEREMONY_TIMEOUT_MS,
            authenticator_selection: AuthenticatorSelection { user_verification },
            attestation: "none".to_string(),
        };

        (options, session)
    }

    /// Verify an attestation response and produce the new credential.
    pub fn finish_registration(
        &self,
        _user: &WebAuthnUser,
        session: &SessionData,
        response: &RegistrationResponse,
    ) -> Result<Credential, WebAuthnError> {
        if session.is_expired() {
            return Err(WebAuthnError::SessionExpired);
        }

        let client_data: CollectedClientData =
            serde_json::from_slice(&response.client_data_json).map_err(|e| {
                WebAuthnError::InvalidRequest(format!("malformed clientDataJSON: {e}"))
            })?;

        if client_data.type_ != "webauthn.create" {
            return Err(WebAuthnError::Verification(format!(
                "unexpected client data type '{}'",
                client_data.type_
            )));
        }
        if !constant_time_eq(
            client_data.challenge.as_bytes(),
            session.challenge.as_bytes(),
        ) {
            return Err(WebAuthnError::Verification(
                "challenge mismatch".to_string(),
            ));
        }
        if !self
            .config()
            .rp_origins
            .iter()
            .any(|origin| origin == &client_data.origin)
        {
            return Err(WebAuthnError::Verification(format!(
                "origin '{}' is not allowed",
                client_data.origin
            )));
        }

        // Attestation object: {fmt, attStmt, authData}.
        let (attestation, _) = decode_first(&response.attestation_object)?;
        let fmt = attestation
            .map_get_text("fmt")
            .and_then(|v| v.as_text())
            .ok_or_else(|| {
                WebAuthnError::InvalidRequest("attestation object missing fmt".to_string())
            })?
            .to_string();
        let auth_data_bytes = attestation
            .map_get_text("authData")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| {
                WebAuthnError::InvalidRequest("attestation object missing authData".to_string())
            })?;

        let auth_data = parse_authenticator_data(auth_data_bytes)?;

        if auth_data.rp_id_hash != sha256(&session.rp_id) {
            return Err(WebAuthnError::Verification(
                "relying party id hash mismatch".to_string(),
            ));
        }
        if !auth_data.has_attested_credential_data() {
            return Err(WebAuthnError::Verification(
                "attested credential data flag not set".to_string(),
            ));
        }

        let attested = auth_data.attested_credential_data.ok_or_else(|| {
            WebAuthnError::InvalidRequest("missing attested credential data".to_string())
        })?;

        Ok(Credential {
            id: attested.credential_id,
            public_key: attested.credential_public_key,
            attestation_type: fmt,
            authenticator: Authenticator {
                aaguid: attested.aaguid,
                sign_count: auth_data.sign_count,
                clone_warning: false,
            },
        })
    }
}
