//! Common fixtures for executor tests.

use std::collections::HashMap;
use std::sync::Arc;

use directory::authn::{AuthnProvider, AuthnProviderConfig};
use directory::user::{CreateUserRequest, UserService};
use resources::idp::IdpService;
use resources::store::CompositeStore;
use serde_json::json;

use crate::graph::NodeBase;

use super::{ExecutorDeps, LogOtpSender};

pub fn task_node(id: &str) -> NodeBase {
    NodeBase {
        id: id.to_string(),
        is_start: false,
        is_final: false,
        properties: HashMap::new(),
        prerequisites: vec![],
    }
}

/// Deps backed by in-memory services, seeded with one user that has a
/// username, password and mobile number.
pub async fn deps_with_user(username: &str, password: &str) -> ExecutorDeps {
    let users = UserService::in_memory();
    let mut attributes = serde_json::Map::new();
    attributes.insert("username".to_string(), json!(username));
    attributes.insert("email".to_string(), json!(format!("{username}@example.com")));
    attributes.insert("mobile".to_string(), json!("+14155550100"));
    users
        .create(CreateUserRequest {
            org_unit_id: None,
            user_type: "person".to_string(),
            attributes,
            password: Some(password.to_string()),
        })
        .await
        .unwrap();

    let authn = AuthnProvider::from_config(&AuthnProviderConfig::Default, users.clone()).unwrap();

    ExecutorDeps {
        authn,
        users,
        idps: IdpService::new(CompositeStore::in_memory()),
        otp_sender: Arc::new(LogOtpSender),
        http: reqwest::Client::new(),
    }
}
