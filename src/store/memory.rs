//! In-process document store. Records keep insertion order; used by tests and the demo server.

use crate::error::StoreError;
use crate::record::{record_get, record_id, Record};
use crate::store::query::search_terms;
use crate::store::{DocumentStore, Filter, Query};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct Collection {
    records: Vec<Record>,
    text_fields: BTreeSet<String>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| record_id(r) == Some(id))
    }

    /// Every term must occur in at least one text-indexed field.
    fn text_match(&self, record: &Record, terms: &[String]) -> bool {
        let haystack: Vec<String> = self
            .text_fields
            .iter()
            .filter_map(|f| record_get(record, f))
            .map(|v| match v {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            })
            .collect();
        terms.iter().all(|t| haystack.iter().any(|h| h.contains(t.as_str())))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection; 0 for unknown collections.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.records.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str, text_fields: &[String]) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        let c = guard.entry(collection.to_string()).or_default();
        c.text_fields.extend(text_fields.iter().cloned());
        Ok(())
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        let mut guard = self.collections.write().await;
        let c = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let id = record_id(&record)
            .ok_or_else(|| StoreError::Encode("record without _id".into()))?
            .to_string();
        if c.position(&id).is_some() {
            return Err(StoreError::DuplicateKey("_id".into()));
        }
        c.records.push(record.clone());
        Ok(record)
    }

    async fn replace(&self, collection: &str, record: Record) -> Result<Option<Record>, StoreError> {
        let mut guard = self.collections.write().await;
        let c = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let Some(pos) = record_id(&record).and_then(|id| c.position(id)) else {
            return Ok(None);
        };
        c.records[pos] = record.clone();
        Ok(Some(record))
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let mut guard = self.collections.write().await;
        let c = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        Ok(c.position(id).map(|pos| c.records.remove(pos)))
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        let guard = self.collections.read().await;
        let c = guard
            .get(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let terms = query.search.as_deref().map(search_terms);
        let mut hits: Vec<Record> = c
            .records
            .iter()
            .filter(|r| query.matches(r))
            .filter(|r| terms.as_ref().map_or(true, |t| c.text_match(r, t)))
            .cloned()
            .collect();
        if !query.sort.is_empty() {
            hits.sort_by(|a, b| query.compare(a, b));
        }
        let skip = query.skip.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(hits.into_iter().skip(skip).take(limit).collect())
    }

    async fn delete_many(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let c = guard
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let before = c.records.len();
        c.records.retain(|r| !filters.iter().all(|f| f.matches(r)));
        Ok((before - c.records.len()) as u64)
    }
}
