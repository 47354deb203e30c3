//! Per-request state handed to access hooks and executors.

use crate::access::Grant;
use crate::error::AppError;
use crate::method::Method;
use crate::record::{set_path, Record};
use crate::store::{Model, Query};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            level: None,
            claims: Map::new(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn has_level(&self, level: &str) -> bool {
        self.level.as_deref() == Some(level)
    }
}

pub type QueryFilter = Arc<dyn Fn(Query) -> Query + Send + Sync>;

/// Created fresh per request. Hooks read it freely but may only change it through
/// [`append`](ApiContext::append), [`query_filter`](ApiContext::query_filter) and
/// [`override_read_access`](ApiContext::override_read_access).
#[derive(Clone)]
pub struct ApiContext {
    user: Option<Principal>,
    model: Arc<Model>,
    method: Method,
    id: Option<String>,
    ids: Vec<String>,
    entry_path: Option<String>,
    params: Value,
    new_entry: Value,
    entry: OnceCell<Option<Record>>,
    append_entry: Record,
    query_filters: Vec<QueryFilter>,
    read_override: Option<Grant>,
}

impl ApiContext {
    pub fn new(model: Arc<Model>, method: Method) -> Self {
        ApiContext {
            user: None,
            model,
            method,
            id: None,
            ids: Vec::new(),
            entry_path: None,
            params: Value::Object(Map::new()),
            new_entry: Value::Null,
            entry: OnceCell::new(),
            append_entry: Record::new(),
            query_filters: Vec::new(),
            read_override: None,
        }
    }

    pub fn with_user(mut self, user: Option<Principal>) -> Self {
        self.user = user;
        self
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_entry_path(mut self, path: Option<String>) -> Self {
        self.entry_path = path;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_new_entry(mut self, body: Value) -> Self {
        self.new_entry = body;
        self
    }

    /// Context for evaluating the read grant of one result record.
    pub fn for_result(&self, record: Record) -> Self {
        let mut ctx = self.clone();
        ctx.method = Method::Read;
        ctx.id = crate::record::record_id(&record).map(str::to_string);
        ctx.entry = OnceCell::new_with(Some(Some(record)));
        ctx
    }

    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn entity(&self) -> &str {
        self.model.name()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Ids addressed by a comma-separated path segment.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn entry_path(&self) -> Option<&str> {
        self.entry_path.as_deref()
    }

    /// Parsed and coerced query-string parameters.
    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// The request body as sent.
    pub fn new_entry(&self) -> &Value {
        &self.new_entry
    }

    pub fn append_entry(&self) -> &Record {
        &self.append_entry
    }

    /// The persisted record addressed by the id, looked up once on first use.
    pub async fn entry(&self) -> Result<Option<&Record>, AppError> {
        let resolved = self
            .entry
            .get_or_try_init(|| async {
                match &self.id {
                    Some(id) => self.model.find_by_id(id, Query::new()).await,
                    None => Ok(None),
                }
            })
            .await?;
        Ok(resolved.as_ref())
    }

    /// Stage a field to be merged into the granted payload (e.g. binding a record to its creator).
    pub fn append(&mut self, path: &str, value: impl Into<Value>) {
        set_path(&mut self.append_entry, path, value.into());
    }

    /// Narrow which records the request can see. Filters apply in registration order.
    pub fn query_filter<F>(&mut self, f: F)
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.query_filters.push(Arc::new(f));
    }

    /// Replace the read grant used to filter this request's results.
    pub fn override_read_access(&mut self, grant: Grant) {
        self.read_override = Some(grant);
    }

    pub fn read_override(&self) -> Option<&Grant> {
        self.read_override.as_ref()
    }

    /// Run the accumulated query filters over `query`.
    pub fn apply_query_filters(&self, query: Query) -> Query {
        self.query_filters.iter().fold(query, |q, f| f(q))
    }
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("entity", &self.entity())
            .field("method", &self.method)
            .field("id", &self.id)
            .field("entry_path", &self.entry_path)
            .field("user", &self.user.as_ref().map(|u| &u.id))
            .field("query_filters", &self.query_filters.len())
            .finish()
    }
}
