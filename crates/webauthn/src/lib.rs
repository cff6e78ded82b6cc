//! WebAuthn relying-party core: challenge issuance, attestation and
//! assertion verification.
//!
//! The core is stateless and value-oriented: `begin_*` returns the
//! client-facing options together with a [`types::SessionData`] value, and
//! `finish_*` consumes that value. Where sessions and credentials live
//! between the two calls is the caller's concern.

pub mod cbor;
pub mod cose;
pub mod login;
pub mod registration;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

use shared::error::CommonError;
use thiserror::Error;

use crate::types::Credential;

#[derive(Debug, Error)]
pub enum WebAuthnError {
    #[error("invalid webauthn payload: {0}")]
    InvalidRequest(String),
    #[error("webauthn verification failed: {0}")]
    Verification(String),
    #[error("unsupported credential key: {0}")]
    UnsupportedKey(String),
    #[error("ceremony session has expired")]
    SessionExpired,
    /// The assertion counter did not increase: the credential may have been
    /// cloned. Carries the credential with `clone_warning` set so the caller
    /// can persist the flag.
    #[error("assertion counter did not increase; possible cloned credential")]
    CloneWarning(Box<Credential>),
}

impl From<WebAuthnError> for CommonError {
    fn from(err: WebAuthnError) -> Self {
        match err {
            WebAuthnError::InvalidRequest(msg) => CommonError::invalid_request(msg),
            WebAuthnError::UnsupportedKey(msg) => CommonError::invalid_request(msg),
            WebAuthnError::Verification(msg) => CommonError::authentication(msg),
            WebAuthnError::SessionExpired => {
                CommonError::authentication("ceremony session has expired")
            }
            WebAuthnError::CloneWarning(_) => {
                CommonError::authentication("credential sign counter did not increase")
            }
        }
    }
}

/// Relying-party configuration. `rp_id` is required; origins are the exact
/// web origins assertions may come from.
#[derive(Debug, Clone)]
pub struct RelyingPartyConfig {
    pub rp_id: String,
    pub rp_display_name: String,
    pub rp_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelyingParty {
    config: RelyingPartyConfig,
}

impl RelyingParty {
    pub fn new(config: RelyingPartyConfig) -> Result<Self, CommonError> {
        if config.rp_id.is_empty() {
            return Err(CommonError::invalid_request(
                "relying party id must not be empty",
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rp_id_required() {
        let err = RelyingParty::new(RelyingPartyConfig {
            rp_id: String::new(),
            rp_display_name: "Example".to_string(),
            rp_origins: vec!["https://app.example".to_string()],
        })
        .unwrap_err();
        assert!(matches!(err, CommonError::InvalidRequest { .. }));
    }
}
