//! Server configuration: YAML file with environment overrides.

use std::path::{Path, PathBuf};

use directory::authn::AuthnProviderConfig;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RelyingPartySettings {
    pub id: String,
    pub display_name: String,
    pub origins: Vec<String>,
}

impl Default for RelyingPartySettings {
    fn default() -> Self {
        Self {
            id: "localhost".to_string(),
            display_name: "Aegis".to_string(),
            origins: vec!["https://localhost:8090".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    pub listen: String,
    pub issuer: String,
    /// PKCS#8/PKCS#1 PEM files; generated at boot when absent.
    pub rsa_private_key_path: Option<PathBuf>,
    pub ec_private_key_path: Option<PathBuf>,
    /// DER certificate hashed into the published thumbprint.
    pub certificate_path: Option<PathBuf>,
    /// Root of the file-defined resource tree (applications/,
    /// identity_providers/, layouts/, themes/, schemas/, senders/).
    pub resources_dir: Option<PathBuf>,
    /// Directory of declarative flow definitions.
    pub flows_dir: Option<PathBuf>,
    pub relying_party: RelyingPartySettings,
    pub authn_provider: AuthnProviderConfig,
    pub jwt_leeway_secs: u64,
    pub code_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub ceremony_ttl_secs: i64,
    pub max_flow_hops: usize,
    pub default_auth_flow_id: String,
    pub outbound_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8090".to_string(),
            issuer: "https://localhost:8090".to_string(),
            rsa_private_key_path: None,
            ec_private_key_path: None,
            certificate_path: None,
            resources_dir: None,
            flows_dir: None,
            relying_party: RelyingPartySettings::default(),
            authn_provider: AuthnProviderConfig::Default,
            jwt_leeway_secs: 30,
            code_ttl_secs: 60,
            refresh_token_ttl_secs: 86_400,
            ceremony_ttl_secs: 600,
            max_flow_hops: 32,
            default_auth_flow_id: "auth_flow_basic".to_string(),
            outbound_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, CommonError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("AEGIS_LISTEN") {
            self.listen = listen;
        }
        if let Ok(issuer) = std::env::var("AEGIS_ISSUER") {
            self.issuer = issuer;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, "0.0.0.0:8090");
        assert_eq!(config.max_flow_hops, 32);
        assert!(matches!(
            config.authn_provider,
            AuthnProviderConfig::Default
        ));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "issuer: https://iam.example\nrelying_party:\n  id: iam.example\n",
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.issuer, "https://iam.example");
        assert_eq!(config.relying_party.id, "iam.example");
        assert_eq!(config.code_ttl_secs, 60);
    }
}
