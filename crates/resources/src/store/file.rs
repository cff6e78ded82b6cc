//! Immutable file-defined resources.
//!
//! Each YAML document in the directory defines one resource. The directory
//! is read once at construction; entries are marked read-only.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use shared::error::CommonError;

use super::{Resource, ResourceReader};

#[derive(Clone)]
pub struct FileStore<R: Resource> {
    entries: Arc<HashMap<String, R>>,
}

impl<R: Resource> Default for FileStore<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: Resource> FileStore<R> {
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R: Resource + DeserializeOwned> FileStore<R> {
    /// Load every `*.yaml`/`*.yml` file under `dir`. A missing directory
    /// yields an empty store; a malformed file is an error naming the path.
    pub fn load_dir(dir: &Path) -> Result<Self, CommonError> {
        let mut entries = HashMap::new();

        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "resource directory absent, file store empty");
            return Ok(Self::empty());
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }

            // File handle is scoped to this iteration.
            let contents = std::fs::read_to_string(&path)?;
            let mut resource: R =
                serde_yaml::from_str(&contents).map_err(|e| CommonError::InvalidResponse {
                    msg: format!("malformed resource file {}: {e}", path.display()),
                    source: Some(anyhow::Error::from(e)),
                })?;
            resource.set_read_only(true);

            if entries
                .insert(resource.id().to_string(), resource)
                .is_some()
            {
                return Err(CommonError::InvalidResponse {
                    msg: format!("duplicate resource id in {}", path.display()),
                    source: None,
                });
            }
        }

        tracing::info!(dir = %dir.display(), count = entries.len(), "loaded file-defined resources");
        Ok(Self {
            entries: Arc::new(entries),
        })
    }
}

impl<R: Resource> ResourceReader<R> for FileStore<R> {
    async fn get_by_id(&self, id: &str) -> Result<Option<R>, CommonError> {
        Ok(self.entries.get(id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<R>, CommonError> {
        Ok(self
            .entries
            .values()
            .find(|resource| resource.name() == name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<R>, CommonError> {
        Ok(self.entries.values().cloned().collect())
    }
}
