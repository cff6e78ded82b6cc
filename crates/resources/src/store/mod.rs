//! Declarative resource stores.
//!
//! Two substores exist per resource kind: an immutable file-defined one and
//! a mutable database-backed one, overlaid by [`composite::CompositeStore`].
//! The database side is a trait seam; [`memory::MemoryStore`] is the
//! in-process implementation.

pub mod composite;
pub mod file;
pub mod memory;

pub use composite::CompositeStore;
pub use file::FileStore;
pub use memory::MemoryStore;

use shared::error::CommonError;

/// A resource that can live in either substore.
pub trait Resource: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn is_read_only(&self) -> bool;
    fn set_read_only(&mut self, read_only: bool);
}

/// Read half of a store.
#[allow(async_fn_in_trait)]
pub trait ResourceReader<R: Resource>: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<R>, CommonError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<R>, CommonError>;
    async fn list(&self) -> Result<Vec<R>, CommonError>;
}

/// Full store: reads plus mutation. Only the database substore implements
/// this; file-defined resources never change at runtime.
#[allow(async_fn_in_trait)]
pub trait ResourceStore<R: Resource>: ResourceReader<R> {
    async fn create(&self, resource: R) -> Result<R, CommonError>;
    async fn update(&self, resource: R) -> Result<R, CommonError>;
    /// Returns whether the resource existed. Idempotent.
    async fn delete(&self, id: &str) -> Result<bool, CommonError>;
}

/// Implements [`Resource`] for a struct with `id`, `name` and `read_only`
/// fields.
macro_rules! impl_resource {
    ($type:ty) => {
        impl $crate::store::Resource for $type {
            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn is_read_only(&self) -> bool {
                self.read_only
            }

            fn set_read_only(&mut self, read_only: bool) {
                self.read_only = read_only;
            }
        }
    };
}

pub(crate) use impl_resource;
