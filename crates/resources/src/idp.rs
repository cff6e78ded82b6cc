//! Identity provider registry.

use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{
    CompositeStore, FileStore, Resource, ResourceReader, ResourceStore, impl_resource,
};

const SECRET_MASK: &str = "******";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdpType {
    Oauth,
    Oidc,
    Google,
    Github,
    Ldap,
    Saml,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdpProperty {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub idp_type: IdpType,
    #[serde(default)]
    pub properties: Vec<IdpProperty>,
    /// Consequence of origin (file vs. database), not a settable field.
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(IdentityProvider);

impl IdentityProvider {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Copy with secret property values masked, for listings.
    pub fn redacted(&self) -> IdentityProvider {
        let mut copy = self.clone();
        for property in &mut copy.properties {
            if property.is_secret {
                property.value = SECRET_MASK.to_string();
            }
        }
        copy
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdpRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub idp_type: IdpType,
    #[serde(default)]
    pub properties: Vec<IdpProperty>,
}

#[derive(Clone)]
pub struct IdpService {
    store: CompositeStore<IdentityProvider>,
}

impl IdpService {
    pub fn new(store: CompositeStore<IdentityProvider>) -> Self {
        Self { store }
    }

    pub fn from_file_store(file: FileStore<IdentityProvider>) -> Self {
        Self::new(CompositeStore::with_file_store(file))
    }

    pub async fn create(&self, request: IdpRequest) -> Result<IdentityProvider, CommonError> {
        if request.name.is_empty() {
            return Err(CommonError::invalid_request(
                "identity provider name is required",
            ));
        }
        if self.store.get_by_name(&request.name).await?.is_some() {
            return Err(CommonError::conflict(format!(
                "identity provider named '{}' already exists",
                request.name
            )));
        }

        let idp = IdentityProvider {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            idp_type: request.idp_type,
            properties: request.properties,
            read_only: false,
        };
        let stored = self.store.create(idp).await?;
        tracing::info!(idp_id = %stored.id, "identity provider created");
        Ok(stored)
    }

    pub async fn update(
        &self,
        id: &str,
        request: IdpRequest,
    ) -> Result<IdentityProvider, CommonError> {
        let existing = self.get(id).await?;
        if existing.is_read_only() {
            return Err(CommonError::invalid_request(
                "file-defined identity providers cannot be modified",
            ));
        }
        if let Some(other) = self.store.get_by_name(&request.name).await?
            && other.id != id
        {
            return Err(CommonError::conflict(format!(
                "identity provider named '{}' already exists",
                request.name
            )));
        }

        self.store
            .update(IdentityProvider {
                id: id.to_string(),
                name: request.name,
                description: request.description,
                idp_type: request.idp_type,
                properties: request.properties,
                read_only: false,
            })
            .await
    }

    /// Idempotent delete: a miss is success.
    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        if let Some(existing) = self.store.get_by_id(id).await?
            && existing.is_read_only()
        {
            return Err(CommonError::invalid_request(
                "file-defined identity providers cannot be deleted",
            ));
        }
        self.store.delete(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<IdentityProvider, CommonError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("identity provider not found", id))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<IdentityProvider, CommonError> {
        self.store
            .get_by_name(name)
            .await?
            .ok_or_else(|| CommonError::not_found("identity provider not found", name))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, CommonError> {
        Ok(self.store.get_by_name(name).await?.is_some())
    }

    /// Listing masks secret property values.
    pub async fn list(&self) -> Result<Vec<IdentityProvider>, CommonError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(IdentityProvider::redacted)
            .collect())
    }
}
