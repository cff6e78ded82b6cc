//! Read-merged, write-one overlay of the two substores.
//!
//! Reads consult the database store first, then the file store. Lists merge
//! both, deduplicating by id with the database winning. Writes only ever
//! touch the database store; rejecting mutation of a file-origin id is the
//! service layer's job.

use std::sync::Arc;

use shared::error::CommonError;

use super::{FileStore, MemoryStore, Resource, ResourceReader, ResourceStore};

#[derive(Clone)]
pub struct CompositeStore<R: Resource, D: ResourceStore<R> = MemoryStore<R>> {
    db: Arc<D>,
    file: Arc<FileStore<R>>,
}

impl<R: Resource, D: ResourceStore<R>> CompositeStore<R, D> {
    pub fn new(db: Arc<D>, file: Arc<FileStore<R>>) -> Self {
        Self { db, file }
    }
}

impl<R: Resource> CompositeStore<R, MemoryStore<R>> {
    /// Composite over a fresh in-memory database store and no file entries.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(FileStore::empty()))
    }

    pub fn with_file_store(file: FileStore<R>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(file))
    }
}

impl<R: Resource, D: ResourceStore<R>> ResourceReader<R> for CompositeStore<R, D> {
    async fn get_by_id(&self, id: &str) -> Result<Option<R>, CommonError> {
        if let Some(mut resource) = self.db.get_by_id(id).await? {
            resource.set_read_only(false);
            return Ok(Some(resource));
        }
        if let Some(mut resource) = self.file.get_by_id(id).await? {
            resource.set_read_only(true);
            return Ok(Some(resource));
        }
        Ok(None)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<R>, CommonError> {
        if let Some(mut resource) = self.db.get_by_name(name).await? {
            resource.set_read_only(false);
            return Ok(Some(resource));
        }
        if let Some(mut resource) = self.file.get_by_name(name).await? {
            resource.set_read_only(true);
            return Ok(Some(resource));
        }
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<R>, CommonError> {
        let mut merged = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for mut resource in self.db.list().await? {
            resource.set_read_only(false);
            seen.insert(resource.id().to_string());
            merged.push(resource);
        }
        for mut resource in self.file.list().await? {
            if seen.contains(resource.id()) {
                continue;
            }
            resource.set_read_only(true);
            merged.push(resource);
        }

        Ok(merged)
    }
}

impl<R: Resource, D: ResourceStore<R>> ResourceStore<R> for CompositeStore<R, D> {
    async fn create(&self, mut resource: R) -> Result<R, CommonError> {
        resource.set_read_only(false);
        self.db.create(resource).await
    }

    async fn update(&self, mut resource: R) -> Result<R, CommonError> {
        resource.set_read_only(false);
        self.db.update(resource).await
    }

    async fn delete(&self, id: &str) -> Result<bool, CommonError> {
        self.db.delete(id).await
    }
}
