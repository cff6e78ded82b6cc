//! Single-use authorization codes and opaque rotating refresh tokens.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use shared::codec::{b64url_encode, random_bytes};

use crate::claims::ClaimsRequest;

#[derive(Debug, Clone)]
pub struct AuthorizationCodeData {
    pub client_id: String,
    pub redirect_uri: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub claims_request: Option<ClaimsRequest>,
    pub nonce: Option<String>,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issued codes, keyed by the opaque code value. Consumption is an atomic
/// remove, so a code can never be redeemed twice.
pub struct CodeStore {
    entries: DashMap<String, AuthorizationCodeData>,
    ttl: Duration,
}

impl CodeStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn issue(&self, mut data: AuthorizationCodeData) -> String {
        let code = b64url_encode(random_bytes::<32>());
        data.expires_at = Utc::now() + self.ttl;
        self.entries.insert(code.clone(), data);
        code
    }

    pub fn consume(&self, code: &str) -> Option<AuthorizationCodeData> {
        let (_, data) = self.entries.remove(code)?;
        if data.expires_at < Utc::now() {
            return None;
        }
        Some(data)
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, data| data.expires_at >= now);
        before - self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub client_id: String,
    pub user_id: String,
    pub scopes: Vec<String>,
    pub claims_request: Option<ClaimsRequest>,
    pub expires_at: DateTime<Utc>,
}

/// Opaque refresh token identifiers, rotated on every use.
pub struct RefreshTokenStore {
    entries: DashMap<String, RefreshTokenData>,
    ttl: Duration,
}

impl RefreshTokenStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn issue(&self, mut data: RefreshTokenData) -> String {
        let token = b64url_encode(random_bytes::<32>());
        data.expires_at = Utc::now() + self.ttl;
        self.entries.insert(token.clone(), data);
        token
    }

    /// Rotation: the presented token is spent whether or not the grant
    /// ultimately succeeds.
    pub fn consume(&self, token: &str) -> Option<RefreshTokenData> {
        let (_, data) = self.entries.remove(token)?;
        if data.expires_at < Utc::now() {
            return None;
        }
        Some(data)
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, data| data.expires_at >= now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_data() -> AuthorizationCodeData {
        AuthorizationCodeData {
            client_id: "cid".to_string(),
            redirect_uri: "https://app.example/cb".to_string(),
            user_id: "u-1".to_string(),
            scopes: vec!["openid".to_string()],
            code_challenge: None,
            code_challenge_method: None,
            claims_request: None,
            nonce: None,
            authenticated_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_code_single_use() {
        let store = CodeStore::new(60);
        let code = store.issue(code_data());

        let first = store.consume(&code);
        assert!(first.is_some());
        // The same code can never be redeemed again.
        assert!(store.consume(&code).is_none());
    }

    #[test]
    fn test_expired_code_rejected() {
        let store = CodeStore::new(-1);
        let code = store.issue(code_data());
        assert!(store.consume(&code).is_none());
    }

    #[test]
    fn test_codes_are_unpredictable_and_distinct() {
        let store = CodeStore::new(60);
        let a = store.issue(code_data());
        let b = store.issue(code_data());
        assert_ne!(a, b);
        assert!(a.len() >= 40);
    }

    #[test]
    fn test_refresh_token_rotation() {
        let store = RefreshTokenStore::new(60);
        let token = store.issue(RefreshTokenData {
            client_id: "cid".to_string(),
            user_id: "u-1".to_string(),
            scopes: vec![],
            claims_request: None,
            expires_at: Utc::now(),
        });

        assert!(store.consume(&token).is_some());
        assert!(store.consume(&token).is_none());
    }

    #[test]
    fn test_sweep_expired() {
        let store = CodeStore::new(-1);
        store.issue(code_data());
        store.issue(code_data());
        assert_eq!(store.sweep_expired(), 2);
    }
}
