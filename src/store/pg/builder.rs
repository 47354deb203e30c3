//! Builds parameterized SQL over `jsonb` document tables.
//!
//! Every collection is one table: `id TEXT PRIMARY KEY, seq BIGSERIAL, doc JSONB`. Identifiers come
//! from entity declarations only; field paths and values are always parameters.

use crate::store::filter::{CmpOp, Filter};
use crate::store::pg::params::PgBind;
use crate::store::Query;
use serde_json::Value;

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, collection: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(collection))
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBind>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgBind) -> u32 {
        self.params.push(v);
        self.params.len() as u32
    }

    /// `doc #> $n` for a dotted path.
    fn path_expr(&mut self, path: &str) -> String {
        let n = self.push_param(PgBind::path(path));
        format!("(doc #> ${}::text[])", n)
    }

    fn json_param(&mut self, v: &Value) -> String {
        let n = self.push_param(PgBind::Json(v.clone()));
        format!("${}::jsonb", n)
    }
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

pub fn create_table(schema: &str, collection: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, seq BIGSERIAL, doc JSONB NOT NULL)",
        qualified_table(schema, collection)
    )
}

pub fn create_doc_index(schema: &str, collection: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (doc)",
        quoted(&format!("{}_doc_idx", collection)),
        qualified_table(schema, collection)
    )
}

pub fn insert(schema: &str, collection: &str, id: &str, doc: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(PgBind::Text(id.to_string()));
    let doc_n = q.push_param(PgBind::Json(doc.clone()));
    q.sql = format!(
        "INSERT INTO {} (id, doc) VALUES (${}, ${}::jsonb) RETURNING doc",
        qualified_table(schema, collection),
        id_n,
        doc_n
    );
    q
}

pub fn replace(schema: &str, collection: &str, id: &str, doc: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let doc_n = q.push_param(PgBind::Json(doc.clone()));
    let id_n = q.push_param(PgBind::Text(id.to_string()));
    q.sql = format!(
        "UPDATE {} SET doc = ${}::jsonb WHERE id = ${} RETURNING doc",
        qualified_table(schema, collection),
        doc_n,
        id_n
    );
    q
}

pub fn remove(schema: &str, collection: &str, id: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(PgBind::Text(id.to_string()));
    q.sql = format!(
        "DELETE FROM {} WHERE id = ${} RETURNING doc",
        qualified_table(schema, collection),
        id_n
    );
    q
}

/// SELECT doc with filters, full-text search, sort (then insertion order), LIMIT/OFFSET.
pub fn select(schema: &str, collection: &str, query: &Query, text_fields: &[String]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut where_parts: Vec<String> = query.filters.iter().map(|f| render_filter(&mut q, f)).collect();
    if let Some(search) = &query.search {
        where_parts.push(render_search(&mut q, search, text_fields));
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };
    let mut order: Vec<String> = query
        .sort
        .iter()
        .map(|k| format!("{} {}", q.path_expr(&k.path), if k.descending { "DESC" } else { "ASC" }))
        .collect();
    order.push("seq".into());
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.skip.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT doc FROM {}{} ORDER BY {}{}{}",
        qualified_table(schema, collection),
        where_clause,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    q
}

/// Bulk delete; the count comes back as a single scalar.
pub fn delete_where(schema: &str, collection: &str, filters: &[Filter]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let parts: Vec<String> = filters.iter().map(|f| render_filter(&mut q, f)).collect();
    let where_clause = if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    };
    q.sql = format!(
        "WITH deleted AS (DELETE FROM {}{} RETURNING 1) SELECT COUNT(*) FROM deleted",
        qualified_table(schema, collection),
        where_clause
    );
    q
}

fn render_search(q: &mut QueryBuf, search: &str, text_fields: &[String]) -> String {
    if text_fields.is_empty() {
        return "FALSE".into();
    }
    let columns: Vec<String> = text_fields
        .iter()
        .map(|f| {
            let n = q.push_param(PgBind::path(f));
            format!("doc #>> ${}::text[]", n)
        })
        .collect();
    let n = q.push_param(PgBind::Text(search.to_string()));
    format!(
        "to_tsvector('simple', concat_ws(' ', {})) @@ plainto_tsquery('simple', ${})",
        columns.join(", "),
        n
    )
}

fn render_eq(q: &mut QueryBuf, path: &str, value: &Value) -> String {
    let field = q.path_expr(path);
    if value.is_null() {
        return format!("({} IS NULL OR {} = 'null'::jsonb)", field, field);
    }
    let v = q.json_param(value);
    let member = q.json_param(&Value::Array(vec![value.clone()]));
    format!(
        "({f} = {v} OR (jsonb_typeof({f}) = 'array' AND {f} @> {m}))",
        f = field,
        v = v,
        m = member
    )
}

pub fn render_filter(q: &mut QueryBuf, filter: &Filter) -> String {
    match filter {
        Filter::Cmp { path, op, value } => match op {
            CmpOp::Eq => render_eq(q, path, value),
            CmpOp::Ne => format!("NOT COALESCE({}, FALSE)", render_eq(q, path, value)),
            CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte => {
                let sym = match op {
                    CmpOp::Gt => ">",
                    CmpOp::Gte => ">=",
                    CmpOp::Lt => "<",
                    _ => "<=",
                };
                let field = q.path_expr(path);
                let v = q.json_param(value);
                format!(
                    "(jsonb_typeof({f}) = jsonb_typeof({v}) AND {f} {sym} {v})",
                    f = field,
                    v = v,
                    sym = sym
                )
            }
        },
        Filter::In { path, values, negate } => {
            let alternatives: Vec<String> = values.iter().map(|v| render_eq(q, path, v)).collect();
            let any = if alternatives.is_empty() {
                "FALSE".to_string()
            } else {
                format!("({})", alternatives.join(" OR "))
            };
            if *negate {
                format!("NOT COALESCE({}, FALSE)", any)
            } else {
                any
            }
        }
        Filter::Exists { path, present } => {
            let field = q.path_expr(path);
            format!("{} IS {}NULL", field, if *present { "NOT " } else { "" })
        }
        Filter::Regex {
            path,
            regex,
            case_insensitive,
        } => {
            let n = q.push_param(PgBind::path(path));
            let r = q.push_param(PgBind::Text(regex.as_str().to_string()));
            format!(
                "(doc #>> ${}::text[]) {} ${}",
                n,
                if *case_insensitive { "~*" } else { "~" },
                r
            )
        }
        Filter::And(fs) | Filter::Or(fs) if fs.is_empty() => {
            if matches!(filter, Filter::And(_)) { "TRUE" } else { "FALSE" }.to_string()
        }
        Filter::And(fs) => {
            let parts: Vec<String> = fs.iter().map(|f| render_filter(q, f)).collect();
            format!("({})", parts.join(" AND "))
        }
        Filter::Or(fs) => {
            let parts: Vec<String> = fs.iter().map(|f| render_filter(q, f)).collect();
            format!("({})", parts.join(" OR "))
        }
    }
}
