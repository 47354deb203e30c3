//! Document store collaborator: the trait the models persist through, plus the two drivers
//! shipped with the crate.

pub mod filter;
pub mod memory;
pub mod model;
pub mod pg;
pub mod query;
pub mod schema;

pub use filter::{CmpOp, Filter};
pub use memory::MemoryStore;
pub use model::{Model, ModelMap, PersistObserver};
pub use pg::PgStore;
pub use query::{Query, SortKey};
pub use schema::{FieldDef, FieldType, SchemaDefinition, Virtual};

use crate::error::StoreError;
use crate::record::Record;
use async_trait::async_trait;

/// Collections hold JSON records keyed by their string `_id`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the collection if needed and register its full-text fields.
    async fn ensure_collection(&self, collection: &str, text_fields: &[String]) -> Result<(), StoreError>;

    /// Insert a record that already carries its `_id`. Duplicate ids are `DuplicateKey`.
    async fn insert(&self, collection: &str, record: Record) -> Result<Record, StoreError>;

    /// Replace the record with the same `_id`. `None` when it no longer exists.
    async fn replace(&self, collection: &str, record: Record) -> Result<Option<Record>, StoreError>;

    async fn remove(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError>;

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError>;

    /// Remove every record matching all filters in one store-level operation.
    async fn delete_many(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError>;
}
