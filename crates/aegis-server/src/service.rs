//! Service wiring: every collaborator is constructed once at bootstrap and
//! injected by handle. No process-global service state exists beyond the
//! loaded key material.

use std::sync::Arc;
use std::time::Duration;

use crypto::jwt::JwtService;
use crypto::keys::{KeyService, PreferredKey};
use dashmap::DashMap;
use directory::authn::AuthnProvider;
use directory::group::GroupService;
use directory::role::RoleService;
use directory::user::UserService;
use flow::context::ContextStore;
use flow::engine::{FlowEngine, FlowEngineConfig};
use flow::executor::{ExecutorDeps, Executors, LogOtpSender};
use flow::registry::FlowRegistry;
use oauth::{OAuthConfig, OAuthService};
use resources::application::ApplicationService;
use resources::catalog::{CatalogService, Layout, NotificationSender, Theme, UserSchema};
use resources::idp::IdpService;
use resources::store::FileStore;
use shared::error::CommonError;
use tokio_util::sync::CancellationToken;
use webauthn::types::{SessionData, WebAuthnUser};
use webauthn::{RelyingParty, RelyingPartyConfig};

use crate::config::ServerConfig;

/// A WebAuthn ceremony parked between begin and finish.
pub struct WebAuthnCeremony {
    pub session: SessionData,
    pub user: WebAuthnUser,
}

#[derive(Clone)]
pub struct AegisService {
    pub config: Arc<ServerConfig>,
    pub keys: Arc<KeyService>,
    pub oauth: OAuthService,
    pub applications: ApplicationService,
    pub idps: IdpService,
    pub users: UserService,
    pub groups: GroupService,
    pub roles: RoleService,
    pub layouts: CatalogService<Layout>,
    pub themes: CatalogService<Theme>,
    pub schemas: CatalogService<UserSchema>,
    pub senders: CatalogService<NotificationSender>,
    pub relying_party: RelyingParty,
    pub webauthn_ceremonies: Arc<DashMap<String, WebAuthnCeremony>>,
    /// Registered WebAuthn credentials per user id.
    pub webauthn_credentials: Arc<DashMap<String, Vec<webauthn::types::Credential>>>,
    pub contexts: Arc<ContextStore>,
    pub shutdown: CancellationToken,
}

impl AegisService {
    pub async fn bootstrap(config: ServerConfig) -> Result<Self, CommonError> {
        let keys = Arc::new(load_keys(&config)?);
        let jwt = JwtService::new(keys.clone(), config.jwt_leeway_secs);

        let root = config.resources_dir.clone();
        let applications =
            ApplicationService::from_file_store(load_file_store(&root, "applications")?);
        let idps = IdpService::from_file_store(load_file_store(&root, "identity_providers")?);
        let layouts =
            CatalogService::from_file_store(load_file_store(&root, "layouts")?, "layout");
        let themes = CatalogService::from_file_store(load_file_store(&root, "themes")?, "theme");
        let schemas =
            CatalogService::from_file_store(load_file_store(&root, "schemas")?, "user schema");
        let senders = CatalogService::from_file_store(
            load_file_store(&root, "senders")?,
            "notification sender",
        );

        let users = UserService::in_memory();
        let groups = GroupService::in_memory();
        let roles = RoleService::in_memory(groups.clone());

        let authn = AuthnProvider::from_config(&config.authn_provider, users.clone())?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.outbound_timeout_secs))
            .build()
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to build client: {e}")))?;

        let registry = Arc::new(FlowRegistry::new());
        if let Some(flows_dir) = &config.flows_dir {
            let known_idps = idps
                .list()
                .await?
                .into_iter()
                .map(|idp| idp.name)
                .collect();
            registry.load_dir(flows_dir, &known_idps)?;
        }

        let engine = Arc::new(FlowEngine::new(
            registry,
            Executors::new(ExecutorDeps {
                authn,
                users: users.clone(),
                idps: idps.clone(),
                otp_sender: Arc::new(LogOtpSender),
                http,
            }),
            FlowEngineConfig {
                max_hops: config.max_flow_hops,
            },
        ));

        let contexts = Arc::new(ContextStore::new(config.ceremony_ttl_secs));
        let oauth = OAuthService::new(
            OAuthConfig {
                issuer: config.issuer.clone(),
                code_ttl_secs: config.code_ttl_secs,
                refresh_token_ttl_secs: config.refresh_token_ttl_secs,
                default_auth_flow_id: config.default_auth_flow_id.clone(),
            },
            applications.clone(),
            users.clone(),
            jwt,
            engine,
            contexts.clone(),
        );

        let relying_party = RelyingParty::new(RelyingPartyConfig {
            rp_id: config.relying_party.id.clone(),
            rp_display_name: config.relying_party.display_name.clone(),
            rp_origins: config.relying_party.origins.clone(),
        })?;

        Ok(Self {
            config: Arc::new(config),
            keys,
            oauth,
            applications,
            idps,
            users,
            groups,
            roles,
            layouts,
            themes,
            schemas,
            senders,
            relying_party,
            webauthn_ceremonies: Arc::new(DashMap::new()),
            webauthn_credentials: Arc::new(DashMap::new()),
            contexts,
            shutdown: CancellationToken::new(),
        })
    }

    /// Periodic cleanup of expired ceremony state. Runs until shutdown.
    pub async fn sweeper(self) {
        let mut timer = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let dropped = self.contexts.sweep_expired();
                    if dropped > 0 {
                        tracing::debug!(dropped, "expired ceremonies swept");
                    }
                    self.webauthn_ceremonies
                        .retain(|_, ceremony| !ceremony.session.is_expired());
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("sweeper shutting down");
                    break;
                }
            }
        }
    }
}

fn load_file_store<R>(
    root: &Option<std::path::PathBuf>,
    subdir: &str,
) -> Result<FileStore<R>, CommonError>
where
    R: resources::store::Resource + serde::de::DeserializeOwned,
{
    match root {
        Some(root) => FileStore::load_dir(&root.join(subdir)),
        None => Ok(FileStore::empty()),
    }
}

fn load_keys(config: &ServerConfig) -> Result<KeyService, CommonError> {
    let certificate = match &config.certificate_path {
        Some(path) => Some(std::fs::read(path)?),
        None => None,
    };

    match (&config.rsa_private_key_path, &config.ec_private_key_path) {
        (Some(rsa_path), Some(ec_path)) => {
            let rsa_pem = std::fs::read_to_string(rsa_path)?;
            let ec_pem = std::fs::read_to_string(ec_path)?;
            KeyService::from_pem(
                &rsa_pem,
                &ec_pem,
                certificate.as_deref(),
                PreferredKey::Rsa,
            )
        }
        _ => {
            tracing::warn!(
                "no signing key paths configured; generating ephemeral keys for this process"
            );
            KeyService::generate(PreferredKey::Rsa)
        }
    }
}
