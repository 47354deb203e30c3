//! PostgreSQL document store: one `jsonb` table per collection inside a configurable schema.

pub mod builder;
pub mod params;

use crate::error::StoreError;
use crate::record::{record_id, Record};
use crate::store::{DocumentStore, Filter, Query};
use async_trait::async_trait;
use builder::QueryBuf;
use params::bind_scalar;
use serde_json::Value;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

pub struct PgStore {
    pool: PgPool,
    schema: String,
    text_fields: RwLock<HashMap<String, Vec<String>>>,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
            text_fields: RwLock::new(HashMap::new()),
        }
    }

    /// Create the database if missing, then open a pool and the store schema.
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, StoreError> {
        ensure_database_exists(database_url).await?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query(&builder::create_schema(schema)).execute(&pool).await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_docs(&self, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = q.params.len(), "query");
        let rows: Vec<Value> = bind_scalar::<Value>(&q.sql, &q.params)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        rows.into_iter().map(into_record).collect()
    }

    async fn fetch_doc(&self, q: &QueryBuf) -> Result<Option<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, "query");
        let row: Option<Value> = bind_scalar::<Value>(&q.sql, &q.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.map(into_record).transpose()
    }
}

fn into_record(v: Value) -> Result<Record, StoreError> {
    match v {
        Value::Object(m) => Ok(m),
        other => Err(StoreError::Encode(format!("stored document is not an object: {}", other))),
    }
}

/// Unique violations surface as `DuplicateKey`.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::DuplicateKey(db.constraint().unwrap_or("_id").to_string());
        }
    }
    StoreError::Db(e)
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn ensure_collection(&self, collection: &str, text_fields: &[String]) -> Result<(), StoreError> {
        for ddl in [
            builder::create_table(&self.schema, collection),
            builder::create_doc_index(&self.schema, collection),
        ] {
            tracing::debug!(sql = %ddl, "ddl");
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        let mut guard = self.text_fields.write().await;
        let fields = guard.entry(collection.to_string()).or_default();
        for f in text_fields {
            if !fields.contains(f) {
                fields.push(f.clone());
            }
        }
        Ok(())
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        let id = record_id(&record)
            .ok_or_else(|| StoreError::Encode("record without _id".into()))?
            .to_string();
        let q = builder::insert(&self.schema, collection, &id, &Value::Object(record));
        self.fetch_doc(&q)
            .await?
            .ok_or_else(|| StoreError::Db(sqlx::Error::RowNotFound))
    }

    async fn replace(&self, collection: &str, record: Record) -> Result<Option<Record>, StoreError> {
        let Some(id) = record_id(&record).map(str::to_string) else {
            return Ok(None);
        };
        let q = builder::replace(&self.schema, collection, &id, &Value::Object(record));
        self.fetch_doc(&q).await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let q = builder::remove(&self.schema, collection, id);
        self.fetch_doc(&q).await
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        let text_fields = self
            .text_fields
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default();
        let q = builder::select(&self.schema, collection, query, &text_fields);
        self.fetch_docs(&q).await
    }

    async fn delete_many(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let q = builder::delete_where(&self.schema, collection, filters);
        tracing::debug!(sql = %q.sql, "query");
        let n: i64 = bind_scalar::<i64>(&q.sql, &q.params)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(n.max(0) as u64)
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        let quoted = format!("\"{}\"", db_name.replace('"', "\"\""));
        sqlx::query(&format!("CREATE DATABASE {}", quoted))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Encode("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
