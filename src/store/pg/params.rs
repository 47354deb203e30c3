//! Bind values for the PostgreSQL driver.

use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow, Postgres};
use sqlx::query::QueryScalar;

/// A parameter rendered by the SQL builder. Paths travel as `text[]`, values as `jsonb`.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBind {
    Text(String),
    Path(Vec<String>),
    Json(Value),
}

impl PgBind {
    pub fn path(dotted: &str) -> Self {
        PgBind::Path(dotted.split('.').map(str::to_string).collect())
    }
}

/// Prepare a scalar query with every parameter bound in order.
pub fn bind_scalar<'q, O>(sql: &'q str, params: &'q [PgBind]) -> QueryScalar<'q, Postgres, O, PgArguments>
where
    (O,): for<'r> sqlx::FromRow<'r, PgRow>,
{
    let mut q = sqlx::query_scalar::<Postgres, O>(sql);
    for p in params {
        q = match p {
            PgBind::Text(s) => q.bind(s.as_str()),
            PgBind::Path(segs) => q.bind(segs.as_slice()),
            PgBind::Json(v) => q.bind(v),
        };
    }
    q
}
