//! Design and schema catalog: layouts, themes, user schemas and
//! notification senders, all served through the composite store with one
//! generic service.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{
    CompositeStore, FileStore, Resource, ResourceReader, ResourceStore, impl_resource,
};

/// Resources that can be scoped to an organizational unit.
pub trait OuScoped {
    fn ou_id(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ou_id: Option<String>,
    /// Page structure document rendered by the login surface.
    #[schema(value_type = Object)]
    pub definition: serde_json::Value,
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(Layout);

impl OuScoped for Layout {
    fn ou_id(&self) -> Option<&str> {
        self.ou_id.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ou_id: Option<String>,
    /// Design tokens (colors, fonts) consumed by the login surface.
    #[schema(value_type = Object)]
    pub definition: serde_json::Value,
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(Theme);

impl OuScoped for Theme {
    fn ou_id(&self) -> Option<&str> {
        self.ou_id.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSchema {
    pub id: String,
    pub name: String,
    /// JSON-schema-shaped attribute definition for a user type.
    #[schema(value_type = Object)]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(UserSchema);

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSender {
    pub id: String,
    pub name: String,
    /// Transport kind, e.g. "sms" or "email".
    pub sender_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub read_only: bool,
}

impl_resource!(NotificationSender);

/// CRUD over one catalog resource kind, with read-only enforcement above
/// the composite store.
#[derive(Clone)]
pub struct CatalogService<R: Resource> {
    store: CompositeStore<R>,
    kind: &'static str,
}

impl<R: Resource + DeserializeOwned> CatalogService<R> {
    pub fn new(store: CompositeStore<R>, kind: &'static str) -> Self {
        Self { store, kind }
    }

    pub fn from_file_store(file: FileStore<R>, kind: &'static str) -> Self {
        Self::new(CompositeStore::with_file_store(file), kind)
    }

    pub async fn create(&self, mut resource: R, make_id: impl FnOnce(&mut R, String)) -> Result<R, CommonError> {
        if resource.name().is_empty() {
            return Err(CommonError::invalid_request(format!(
                "{} name is required",
                self.kind
            )));
        }
        if self.store.get_by_name(resource.name()).await?.is_some() {
            return Err(CommonError::conflict(format!(
                "{} named '{}' already exists",
                self.kind,
                resource.name()
            )));
        }
        make_id(&mut resource, Uuid::new_v4().to_string());
        self.store.create(resource).await
    }

    pub async fn update(&self, resource: R) -> Result<R, CommonError> {
        let existing = self.get(resource.id()).await?;
        if existing.is_read_only() {
            return Err(CommonError::invalid_request(format!(
                "file-defined {} cannot be modified",
                self.kind
            )));
        }
        if let Some(other) = self.store.get_by_name(resource.name()).await?
            && other.id() != resource.id()
        {
            return Err(CommonError::conflict(format!(
                "{} named '{}' already exists",
                self.kind,
                resource.name()
            )));
        }
        self.store.update(resource).await
    }

    /// Idempotent delete: a miss is success.
    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        if let Some(existing) = self.store.get_by_id(id).await?
            && existing.is_read_only()
        {
            return Err(CommonError::invalid_request(format!(
                "file-defined {} cannot be deleted",
                self.kind
            )));
        }
        self.store.delete(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<R, CommonError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found(format!("{} not found", self.kind), id))
    }

    pub async fn list(&self) -> Result<Vec<R>, CommonError> {
        self.store.list().await
    }
}

impl<R: Resource + DeserializeOwned + OuScoped> CatalogService<R> {
    /// Resolve a design resource by name for an organizational unit: an
    /// OU-scoped entry wins, then the deployment-wide entry (no OU) is the
    /// fallback. No inheritance walk beyond that.
    pub async fn resolve_for_ou(
        &self,
        name: &str,
        ou_id: Option<&str>,
    ) -> Result<R, CommonError> {
        let entries = self.store.list().await?;

        if let Some(ou) = ou_id
            && let Some(scoped) = entries
                .iter()
                .find(|e| e.name() == name && e.ou_id() == Some(ou))
        {
            return Ok(scoped.clone());
        }

        entries
            .into_iter()
            .find(|e| e.name() == name && e.ou_id().is_none())
            .ok_or_else(|| CommonError::not_found(format!("{} not found", self.kind), name))
    }
}
