//! Login (assertion) ceremony, including the passkey variant.

use chrono::{Duration, Utc};
use shared::codec::{b64url_encode, constant_time_eq, random_bytes, sha256};

use crate::cose::parse_cose_key;
use crate::types::{
    AssertionResponse, CollectedClientData, Credential, CredentialDescriptor,
    CredentialRequestOptions, SessionData, UserVerificationRequirement, WebAuthnUser,
    parse_authenticator_data,
};
use crate::{RelyingParty, WebAuthnError};

const CHALLENGE_LEN: usize = 32;
const SESSION_TTL_MINUTES: i64 = 5;
const CEREMONY_TIMEOUT_MS: u32 = 60_000;

impl RelyingParty {
    /// Start a login ceremony. With a known user the options enumerate the
    /// user's credentials; without one (passkey flow) `allowCredentials`
    /// stays empty and the authenticator chooses.
    pub fn begin_login(
        &self,
        user: Option<&WebAuthnUser>,
        user_verification: UserVerificationRequirement,
    ) -> (CredentialRequestOptions, SessionData) {
        let challenge = b64url_encode(random_bytes::<CHALLENGE_LEN>());

        let session = SessionData {
            challenge: challenge.clone(),
            user_id: user.map(|u| u.id.clone()),
            user_verification,
            expires: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
            rp_id: self.config().rp_id.clone(),
        };

        let options = CredentialRequestOptions {
            challenge,
            timeout: CEREMONY_TIMEOUT_MS,
            rp_id: self.config().rp_id.clone(),
            allow_credentials: user
                .map(|u| {
                    u.credentials
                        .iter()
                        .map(CredentialDescriptor::from_credential)
                        .collect()
                })
                .unwrap_or_default(),
            user_verification,
        };

        (options, session)
    }

    /// Verify an assertion for a known user. On success returns the
    /// credential with its sign counter advanced; a non-increasing counter
    /// fails with [`WebAuthnError::CloneWarning`].
    pub fn finish_login(
        &self,
        user: &WebAuthnUser,
        session: &SessionData,
        response: &AssertionResponse,
    ) -> Result<Credential, WebAuthnError> {
        let credential = user
            .credentials
            .iter()
            .find(|c| c.id == response.raw_id)
            .ok_or_else(|| {
                WebAuthnError::Verification("unknown credential for user".to_string())
            })?;

        self.verify_assertion(credential, session, response)
    }

    /// Passkey login: the user is resolved from the assertion itself via
    /// `resolve_user(raw_id, user_handle)`, then the ordinary assertion
    /// algorithm applies.
    pub fn finish_passkey_login<F>(
        &self,
        session: &SessionData,
        response: &AssertionResponse,
        resolve_user: F,
    ) -> Result<(WebAuthnUser, Credential), WebAuthnError>
    where
        F: FnOnce(&[u8], Option<&[u8]>) -> Result<WebAuthnUser, WebAuthnError>,
    {
        let user = resolve_user(&response.raw_id, response.user_handle.as_deref())?;
        let credential = self.finish_login(&user, session, response)?;
        Ok((user, credential))
    }

    fn verify_assertion(
        &self,
        credential: &Credential,
        session: &SessionData,
        response: &AssertionResponse,
    ) -> Result<Credential, WebAuthnError> {
        if session.is_expired() {
            return Err(WebAuthnError::SessionExpired);
        }

        let client_data: CollectedClientData =
            serde_json::from_slice(&response.client_data_json).map_err(|e| {
                WebAuthnError::InvalidRequest(format!("malformed clientDataJSON: {e}"))
            })?;

        if client_data.type_ != "webauthn.get" {
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

        let auth_data = parse_authenticator_data(&response.authenticator_data)?;

        if auth_data.rp_id_hash != sha256(&session.rp_id) {
            return Err(WebAuthnError::Verification(
                "relying party id hash mismatch".to_string(),
            ));
        }
        if !auth_data.user_present() {
            return Err(WebAuthnError::Verification(
                "user presence flag not set".to_string(),
            ));
        }
        if session.user_verification == UserVerificationRequirement::Required
            && !auth_data.user_verified()
        {
            return Err(WebAuthnError::Verification(
                "user verification required but not performed".to_string(),
            ));
        }

        // Signature covers authenticatorData || SHA-256(clientDataJSON).
        let mut signed_data =
            Vec::with_capacity(response.authenticator_data.len() + 32);
        signed_data.extend_from_slice(&response.authenticator_data);
        signed_data.extend_from_slice(&sha256(&response.client_data_json));

        let (public_key, _) = parse_cose_key(&credential.public_key)?;
        public_key.verify(&signed_data, &response.signature)?;

        // Counter policy: a zero counter means the authenticator does not
        // keep one; otherwise it must strictly increase.
        let incoming = auth_data.sign_count;
        let stored = credential.authenticator.sign_count;
        let mut updated = credential.clone();
        if incoming > 0 && incoming <= stored {
            updated.authenticator.clone_warning = true;
            return Err(WebAuthnError::CloneWarning(Box::new(updated)));
        }
        updated.authenticator.sign_count = incoming;
        Ok(updated)
    }
}
