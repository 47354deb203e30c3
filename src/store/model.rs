//! Resolved, queryable handles: one per entity, built by the registry.

use crate::error::{AppError, StoreError};
use crate::record::{is_valid_id, new_id, record_get, record_id, set_path, Record, ID_FIELD, NO_FLUX_FIELD, TYPE_TAG_FIELD};
use crate::service::validation::RecordValidator;
use crate::store::schema::{FieldType, SchemaDefinition};
use crate::store::{DocumentStore, Filter, Query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Post-persist lifecycle hooks. They run after the store acknowledged the write, for every
/// code path that goes through the model.
pub trait PersistObserver: Send + Sync {
    fn after_save(&self, _entity: &str, _record: &Record, _was_new: bool) {}
    fn after_remove(&self, _entity: &str, _record: &Record) {}
    fn after_delete_many(&self, _entity: &str, _removed: u64) {}
}

pub type ModelMap = HashMap<String, Arc<Model>>;

pub struct Model {
    name: String,
    collection: String,
    /// Set for discriminated models: records carry `__t = name` in the base's collection.
    base: Option<String>,
    schema: Arc<SchemaDefinition>,
    store: Arc<dyn DocumentStore>,
}

impl Model {
    /// A top-level model with its own collection.
    pub async fn top_level(schema: SchemaDefinition, store: Arc<dyn DocumentStore>) -> Result<Self, StoreError> {
        let name = schema.entity.clone();
        store.ensure_collection(&name, &schema.text_index).await?;
        Ok(Model {
            collection: name.clone(),
            name,
            base: None,
            schema: Arc::new(schema),
            store,
        })
    }

    /// A sub-type stored in `base`'s collection and tagged with its own name.
    pub async fn discriminated(base: &Model, schema: SchemaDefinition) -> Result<Self, StoreError> {
        base.store.ensure_collection(&base.collection, &schema.text_index).await?;
        Ok(Model {
            name: schema.entity.clone(),
            collection: base.collection.clone(),
            base: Some(base.name.clone()),
            schema: Arc::new(schema),
            store: base.store.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// Starting query for this model, carrying its default sort.
    pub fn query(&self) -> Query {
        Query::new().sort(self.schema.default_sort.clone())
    }

    /// Discriminated models see only their own records.
    pub async fn find(&self, query: Query) -> Result<Vec<Record>, AppError> {
        if query.search.is_some() && self.schema.text_index.is_empty() {
            return Err(AppError::BadRequest(format!("{} has no text index", self.name)));
        }
        let query = match &self.base {
            Some(_) => query.filter(Filter::eq(TYPE_TAG_FIELD, self.name.clone())),
            None => query,
        };
        let records = self.store.find(&self.collection, &query).await?;
        Ok(records.into_iter().map(|r| self.with_virtuals(r)).collect())
    }

    /// Find one record by id through `query` (which may already carry access filters).
    pub async fn find_by_id(&self, id: &str, query: Query) -> Result<Option<Record>, AppError> {
        let mut q = query.filter(Filter::eq(ID_FIELD, id.to_string())).limit(1);
        q.skip = None;
        Ok(self.find(q).await?.into_iter().next())
    }

    /// Assign an id, apply defaults and the type tag, validate, enforce uniqueness, persist.
    pub async fn create(&self, data: Record) -> Result<Record, AppError> {
        let (mut record, silent) = self.strip_transient(data);
        if !record.get(ID_FIELD).and_then(Value::as_str).is_some_and(is_valid_id) {
            record.insert(ID_FIELD.into(), Value::String(new_id()));
        }
        self.apply_defaults(&mut record);
        if self.base.is_some() {
            record.insert(TYPE_TAG_FIELD.into(), Value::String(self.name.clone()));
        }
        RecordValidator::validate(&record, &self.schema.fields)?;
        self.check_unique(&record).await?;
        let saved = self.store.insert(&self.collection, record).await?;
        tracing::debug!(entity = %self.name, id = ?record_id(&saved), "created");
        if !silent {
            for o in self.schema.observers() {
                o.after_save(&self.name, &saved, true);
            }
        }
        Ok(self.with_virtuals(saved))
    }

    /// Persist a modified existing record.
    pub async fn save(&self, data: Record) -> Result<Record, AppError> {
        let (record, silent) = self.strip_transient(data);
        let id = record_id(&record)
            .ok_or_else(|| AppError::BadRequest("record has no _id".into()))?
            .to_string();
        RecordValidator::validate(&record, &self.schema.fields)?;
        self.check_unique(&record).await?;
        let saved = self
            .store
            .replace(&self.collection, record)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.name, id)))?;
        tracing::debug!(entity = %self.name, id = %id, "saved");
        if !silent {
            for o in self.schema.observers() {
                o.after_save(&self.name, &saved, false);
            }
        }
        Ok(self.with_virtuals(saved))
    }

    pub async fn remove(&self, id: &str) -> Result<Option<Record>, AppError> {
        let removed = self.store.remove(&self.collection, id).await?;
        if let Some(r) = &removed {
            tracing::debug!(entity = %self.name, id = %id, "removed");
            for o in self.schema.observers() {
                o.after_remove(&self.name, r);
            }
        }
        Ok(removed.map(|r| self.with_virtuals(r)))
    }

    /// Store-level bulk delete.
    pub async fn delete_many(&self, mut filters: Vec<Filter>) -> Result<u64, AppError> {
        if self.base.is_some() {
            filters.push(Filter::eq(TYPE_TAG_FIELD, self.name.clone()));
        }
        let n = self.store.delete_many(&self.collection, &filters).await?;
        tracing::debug!(entity = %self.name, removed = n, "deleted many");
        for o in self.schema.observers() {
            o.after_delete_many(&self.name, n);
        }
        Ok(n)
    }

    /// Drop virtual fields and the flux opt-out sentinel; report whether the sentinel was set.
    fn strip_transient(&self, mut record: Record) -> (Record, bool) {
        let silent = record
            .remove(NO_FLUX_FIELD)
            .is_some_and(|v| v.as_bool().unwrap_or(true));
        for v in self.schema.virtuals() {
            record.remove(&v.name);
        }
        (record, silent)
    }

    fn apply_defaults(&self, record: &mut Record) {
        for (path, def) in &self.schema.fields {
            if record_get(record, path).is_some() {
                continue;
            }
            let value = match (&def.default, def.field_type) {
                (Some(Value::String(s)), FieldType::Date) if s == "$now" => {
                    Value::String(chrono::Utc::now().to_rfc3339())
                }
                (Some(v), _) => v.clone(),
                (None, FieldType::Array) => Value::Array(Vec::new()),
                (None, _) => continue,
            };
            set_path(record, path, value);
        }
    }

    /// Unique fields are unique across the whole collection, sub-types included.
    async fn check_unique(&self, record: &Record) -> Result<(), AppError> {
        let id = record_id(record).unwrap_or_default().to_string();
        for (path, def) in &self.schema.fields {
            if !def.unique {
                continue;
            }
            let Some(value) = record_get(record, path).filter(|v| !v.is_null()) else {
                continue;
            };
            let q = Query::new()
                .filter(Filter::eq(path.clone(), value.clone()))
                .filter(Filter::Cmp {
                    path: ID_FIELD.into(),
                    op: crate::store::CmpOp::Ne,
                    value: Value::String(id.clone()),
                })
                .limit(1);
            if !self.store.find(&self.collection, &q).await?.is_empty() {
                return Err(StoreError::DuplicateKey(path.clone()).into());
            }
        }
        Ok(())
    }

    fn with_virtuals(&self, mut record: Record) -> Record {
        for v in self.schema.virtuals() {
            let value = v.compute(&record);
            record.insert(v.name.clone(), value);
        }
        record
    }
}
