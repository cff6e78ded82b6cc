//! OAuth2/OIDC token surface: authorize, token, userinfo and
//! introspection, layered over the flow engine and the application
//! registry.

pub mod authorize;
pub mod claims;
pub mod codes;
pub mod introspect;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use crypto::jwt::JwtService;
use directory::user::UserService;
use flow::context::ContextStore;
use flow::engine::FlowEngine;
use resources::application::ApplicationService;

use crate::codes::{CodeStore, RefreshTokenStore};

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Server-wide issuer; applications may override it.
    pub issuer: String,
    /// Authorization code lifetime.
    pub code_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    /// Flow used when an application binds none.
    pub default_auth_flow_id: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://localhost:8090".to_string(),
            code_ttl_secs: 60,
            refresh_token_ttl_secs: 86_400,
            default_auth_flow_id: "auth_flow_basic".to_string(),
        }
    }
}

/// The token service. Stateless over its injected collaborators; safe for
/// concurrent use.
#[derive(Clone)]
pub struct OAuthService {
    pub(crate) config: OAuthConfig,
    pub(crate) applications: ApplicationService,
    pub(crate) users: UserService,
    pub(crate) jwt: JwtService,
    pub(crate) engine: Arc<FlowEngine>,
    pub(crate) contexts: Arc<ContextStore>,
    pub(crate) codes: Arc<CodeStore>,
    pub(crate) refresh_tokens: Arc<RefreshTokenStore>,
    pub(crate) pending: Arc<authorize::PendingAuthorizations>,
}

impl OAuthService {
    pub fn new(
        config: OAuthConfig,
        applications: ApplicationService,
        users: UserService,
        jwt: JwtService,
        engine: Arc<FlowEngine>,
        contexts: Arc<ContextStore>,
    ) -> Self {
        let codes = Arc::new(CodeStore::new(config.code_ttl_secs));
        let refresh_tokens = Arc::new(RefreshTokenStore::new(config.refresh_token_ttl_secs));
        Self {
            config,
            applications,
            users,
            jwt,
            engine,
            contexts,
            codes,
            refresh_tokens,
            pending: Arc::new(authorize::PendingAuthorizations::new()),
        }
    }

    pub fn applications(&self) -> &ApplicationService {
        &self.applications
    }
}
