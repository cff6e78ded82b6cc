//! User store and service: identification, credential verification and
//! attribute access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::codec::{b64_encode, constant_time_eq, random_bytes, sha256_hex};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

/// Salted SHA-256 credential hash. The plaintext never persists.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredCredential {
    pub salt: String,
    pub hash: String,
}

impl StoredCredential {
    pub fn from_password(password: &str) -> Self {
        let salt = b64_encode(random_bytes::<16>());
        let hash = sha256_hex(format!("{salt}{password}"));
        Self { salt, hash }
    }

    pub fn matches(&self, password: &str) -> bool {
        let computed = sha256_hex(format!("{}{}", self.salt, password));
        constant_time_eq(computed.as_bytes(), self.hash.as_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub org_unit_id: Option<String>,
    /// User schema name this user conforms to, e.g. "person".
    pub user_type: String,
    /// Free-form attributes keyed by name (username, email, mobile, ...).
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<StoredCredential>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

#[async_trait]
pub trait UserStoreLike: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), CommonError>;
    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, CommonError>;
    async fn update_user(&self, user: &User) -> Result<(), CommonError>;
    async fn delete_user(&self, id: &str) -> Result<(), CommonError>;
    async fn list_users(&self) -> Result<Vec<User>, CommonError>;
    /// First user whose attributes contain every filter pair.
    async fn find_user(&self, filters: &Map<String, Value>) -> Result<Option<User>, CommonError>;
}

#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<DashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStoreLike for MemoryUserStore {
    async fn create_user(&self, user: &User) -> Result<(), CommonError> {
        match self.users.entry(user.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CommonError::conflict(format!(
                "user '{}' already exists",
                user.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, CommonError> {
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn update_user(&self, user: &User) -> Result<(), CommonError> {
        match self.users.get_mut(&user.id) {
            Some(mut entry) => {
                *entry.value_mut() = user.clone();
                Ok(())
            }
            None => Err(CommonError::not_found("user not found", user.id.clone())),
        }
    }

    async fn delete_user(&self, id: &str) -> Result<(), CommonError> {
        self.users.remove(id);
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, CommonError> {
        Ok(self.users.iter().map(|u| u.value().clone()).collect())
    }

    async fn find_user(&self, filters: &Map<String, Value>) -> Result<Option<User>, CommonError> {
        Ok(self
            .users
            .iter()
            .find(|entry| {
                filters
                    .iter()
                    .all(|(key, value)| entry.value().attributes.get(key) == Some(value))
            })
            .map(|entry| entry.value().clone()))
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub org_unit_id: Option<String>,
    #[serde(default = "default_user_type")]
    pub user_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
    /// Plaintext password; hashed before storage.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_user_type() -> String {
    "person".to_string()
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStoreLike>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStoreLike>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryUserStore::new()))
    }

    pub async fn create(&self, request: CreateUserRequest) -> Result<User, CommonError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            org_unit_id: request.org_unit_id,
            user_type: request.user_type,
            attributes: request.attributes,
            credential: request
                .password
                .as_deref()
                .map(StoredCredential::from_password),
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user).await?;
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Result<User, CommonError> {
        self.store
            .get_user_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("user not found", id))
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        self.store.delete_user(id).await
    }

    pub async fn list(&self) -> Result<Vec<User>, CommonError> {
        self.store.list_users().await
    }

    /// Locate a user by attribute filters (e.g. `{"username": "jdoe"}`).
    pub async fn identify(&self, filters: &Map<String, Value>) -> Result<User, CommonError> {
        if filters.is_empty() {
            return Err(CommonError::invalid_request(
                "at least one identifying attribute is required",
            ));
        }
        self.store
            .find_user(filters)
            .await?
            .ok_or_else(|| CommonError::not_found("user not found", format!("{filters:?}")))
    }

    /// Identify and verify a password in one step.
    pub async fn verify_credentials(
        &self,
        filters: &Map<String, Value>,
        password: &str,
    ) -> Result<User, CommonError> {
        let user = self.identify(filters).await?;
        let credential = user
            .credential
            .as_ref()
            .ok_or_else(|| CommonError::authentication("user has no password credential"))?;
        if !credential.matches(password) {
            return Err(CommonError::authentication("incorrect credentials"));
        }
        Ok(user)
    }

    /// All attributes, or the requested subset of them.
    pub async fn get_attributes(
        &self,
        user_id: &str,
        requested: Option<&[String]>,
    ) -> Result<Map<String, Value>, CommonError> {
        let user = self.get(user_id).await?;
        Ok(filter_attributes(user.attributes, requested))
    }

    /// Merge attributes into the user record (attribute collection and
    /// provisioning write through here).
    pub async fn merge_attributes(
        &self,
        user_id: &str,
        attributes: Map<String, Value>,
    ) -> Result<User, CommonError> {
        let mut user = self.get(user_id).await?;
        for (key, value) in attributes {
            user.attributes.insert(key, value);
        }
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        Ok(user)
    }

    pub async fn set_password(&self, user_id: &str, password: &str) -> Result<(), CommonError> {
        let mut user = self.get(user_id).await?;
        user.credential = Some(StoredCredential::from_password(password));
        user.updated_at = Utc::now();
        self.store.update_user(&user).await
    }
}

pub fn filter_attributes(
    attributes: Map<String, Value>,
    requested: Option<&[String]>,
) -> Map<String, Value> {
    match requested {
        None => attributes,
        Some(names) => attributes
            .into_iter()
            .filter(|(key, _)| names.iter().any(|n| n == key))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(username: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("username".to_string(), json!(username));
        map
    }

    async fn seeded_service() -> UserService {
        let service = UserService::in_memory();
        let mut attributes = Map::new();
        attributes.insert("username".to_string(), json!("jdoe"));
        attributes.insert("email".to_string(), json!("jdoe@example.com"));
        attributes.insert("mobile".to_string(), json!("+14155550100"));
        service
            .create(CreateUserRequest {
                org_unit_id: None,
                user_type: "person".to_string(),
                attributes,
                password: Some("hunter2".to_string()),
            })
            .await
            .unwrap();
        service
    }

    #[tokio::test]
    async fn test_identify_by_attributes() {
        let service = seeded_service().await;
        let user = service.identify(&filters("jdoe")).await.unwrap();
        assert_eq!(user.attribute("email"), Some(&json!("jdoe@example.com")));

        let err = service.identify(&filters("nobody")).await.unwrap_err();
        assert!(matches!(err, CommonError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_verify_credentials() {
        let service = seeded_service().await;
        service
            .verify_credentials(&filters("jdoe"), "hunter2")
            .await
            .unwrap();

        let err = service
            .verify_credentials(&filters("jdoe"), "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, CommonError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_get_attributes_subset() {
        let service = seeded_service().await;
        let user = service.identify(&filters("jdoe")).await.unwrap();

        let all = service.get_attributes(&user.id, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let subset = service
            .get_attributes(&user.id, Some(&["email".to_string()]))
            .await
            .unwrap();
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get("email"), Some(&json!("jdoe@example.com")));
    }

    #[tokio::test]
    async fn test_merge_attributes() {
        let service = seeded_service().await;
        let user = service.identify(&filters("jdoe")).await.unwrap();

        let mut extra = Map::new();
        extra.insert("given_name".to_string(), json!("Jane"));
        let updated = service.merge_attributes(&user.id, extra).await.unwrap();
        assert_eq!(updated.attribute("given_name"), Some(&json!("Jane")));
        // Existing attributes survive the merge.
        assert_eq!(updated.attribute("username"), Some(&json!("jdoe")));
    }

    #[test]
    fn test_stored_credential_salted() {
        let a = StoredCredential::from_password("pw");
        let b = StoredCredential::from_password("pw");
        assert_ne!(a.hash, b.hash, "salts must differ");
        assert!(a.matches("pw"));
        assert!(!a.matches("other"));
    }
}
