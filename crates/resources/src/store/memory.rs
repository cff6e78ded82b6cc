//! In-process mutable store. Stands in for the relational database behind
//! the same trait seam.

use std::sync::Arc;

use dashmap::DashMap;
use shared::error::CommonError;

use super::{Resource, ResourceReader, ResourceStore};

#[derive(Clone)]
pub struct MemoryStore<R: Resource> {
    entries: Arc<DashMap<String, R>>,
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

impl<R: Resource> ResourceReader<R> for MemoryStore<R> {
    async fn get_by_id(&self, id: &str) -> Result<Option<R>, CommonError> {
        Ok(self.entries.get(id).map(|entry| entry.value().clone()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<R>, CommonError> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<R>, CommonError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

impl<R: Resource> ResourceStore<R> for MemoryStore<R> {
    async fn create(&self, resource: R) -> Result<R, CommonError> {
        let id = resource.id().to_string();
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CommonError::conflict(format!(
                "resource '{}' already exists",
                resource.id()
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(resource.clone());
                Ok(resource)
            }
        }
    }

    async fn update(&self, resource: R) -> Result<R, CommonError> {
        match self.entries.get_mut(resource.id()) {
            Some(mut entry) => {
                *entry.value_mut() = resource.clone();
                Ok(resource)
            }
            None => Err(CommonError::not_found(
                "resource not found",
                resource.id().to_string(),
            )),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, CommonError> {
        Ok(self.entries.remove(id).is_some())
    }
}
