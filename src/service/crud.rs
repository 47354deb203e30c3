//! CRUD execution: one executor per method, then read-access filtering of what comes back.

use crate::access::{changed_paths, ensure_granted, granted_view, not_granted, EntityPermissions, Grant};
use crate::config::GatewayConfig;
use crate::context::ApiContext;
use crate::error::AppError;
use crate::method::Method;
use crate::record::{get_path, get_path_mut, loosely_equal, merge_paths, record_id, set_path, Record, ID_FIELD};
use crate::store::{Filter, Query, SortKey};
use serde_json::{json, Value};

pub struct CrudExecutor<'a> {
    permissions: &'a EntityPermissions,
    default_limit: usize,
    max_limit: usize,
}

impl<'a> CrudExecutor<'a> {
    pub fn new(permissions: &'a EntityPermissions, config: &GatewayConfig) -> Self {
        CrudExecutor {
            permissions,
            default_limit: config.collection_list_limit,
            max_limit: config.collection_max_list_limit,
        }
    }

    /// Run the context's method with the grant its access hook returned.
    pub async fn execute(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        if grant.is_denied() {
            return Err(denied(ctx));
        }
        match ctx.method() {
            Method::Create => self.create(ctx, grant).await,
            Method::Read => self.read(ctx, grant).await,
            Method::Update => self.update(ctx, grant).await,
            Method::Patch => self.patch(ctx, grant).await,
            Method::Delete => self.delete(ctx, grant).await,
            Method::List => self.list(ctx, grant).await,
            Method::Push => self.push(ctx, grant).await,
            Method::Pull => self.pull(ctx, grant).await,
        }
    }

    async fn create(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let requested = body_record(ctx.new_entry())?;
        ensure_granted(not_granted(&requested, grant))?;
        let mut data = granted_view(&requested, grant);
        merge_paths(&mut data, ctx.append_entry());
        let saved = ctx.model().create(data).await?;
        self.visible_value(ctx, saved, Some(grant)).await
    }

    async fn read(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let id = require_id(ctx)?;
        let record = self
            .find_entry(ctx)
            .await?
            .ok_or_else(|| AppError::NotFound(not_found_path(id, ctx.entry_path())))?;
        let visible = self.visible(ctx, record, Some(grant)).await?.ok_or_else(|| denied(ctx))?;
        match ctx.entry_path() {
            Some(path) => get_path(&Value::Object(visible), path)
                .cloned()
                .ok_or_else(|| AppError::NotFound(not_found_path(id, Some(path)))),
            None => Ok(Value::Object(visible)),
        }
    }

    async fn update(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let requested = body_record(ctx.new_entry())?;
        self.apply_update(ctx, grant, requested).await
    }

    /// Set the sub-path to the body, as an update of that path.
    async fn patch(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let path = ctx
            .entry_path()
            .ok_or_else(|| AppError::BadRequest("patch requires a sub-path".into()))?;
        let mut requested = Record::new();
        set_path(&mut requested, path, ctx.new_entry().clone());
        self.apply_update(ctx, grant, requested).await
    }

    /// Only paths whose value actually changes are checked against the grant.
    async fn apply_update(&self, ctx: &ApiContext, grant: &Grant, mut requested: Record) -> Result<Value, AppError> {
        let current = self
            .find_entry(ctx)
            .await?
            .ok_or_else(|| AppError::BadRequest("Entry not found.".into()))?;
        requested.remove(ID_FIELD);
        let changed = changed_paths(&current, &requested);
        ensure_granted(changed.into_iter().filter(|p| !grant.covers(p)).collect())?;

        let mut merged = current;
        merge_paths(&mut merged, &granted_view(&requested, grant));
        merge_paths(&mut merged, ctx.append_entry());
        let saved = ctx.model().save(merged).await?;
        self.visible_value(ctx, saved, Some(grant)).await
    }

    /// By id; or by an id list (path or `id` param) or a filter object (`id` param). With
    /// `many`, one store-level delete; otherwise record by record, collecting failures.
    async fn delete(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        if let Some(id) = ctx.id() {
            self.find_entry(ctx)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", ctx.entity(), id)))?;
            let removed = ctx
                .model()
                .remove(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("{} {}", ctx.entity(), id)))?;
            return self.visible_value(ctx, removed, None).await;
        }

        let (filter, query_echo) = if !ctx.ids().is_empty() {
            (Filter::id_in(ctx.ids().iter().cloned()), json!(ctx.ids()))
        } else {
            match ctx.param("id") {
                Some(Value::Array(ids)) if !ids.is_empty() => (
                    Filter::In {
                        path: ID_FIELD.into(),
                        values: ids.iter().map(|v| Value::String(scalar_string(v))).collect(),
                        negate: false,
                    },
                    Value::Array(ids.clone()),
                ),
                Some(v @ Value::Object(_)) => {
                    let f = Filter::parse(v)?;
                    self.ensure_queryable(ctx, grant, f.paths()).await?;
                    (f, v.clone())
                }
                _ => return Err(AppError::BadRequest("delete needs an id, a list of ids or a filter".into())),
            }
        };

        let query = ctx.apply_query_filters(Query::new().filter(filter));
        if truthy(ctx.param("many")) {
            let n = ctx.model().delete_many(query.filters).await?;
            return Ok(json!({ "query": query_echo, "result": { "deletedCount": n } }));
        }

        let entries = ctx.model().find(query).await?;
        let mut removed = Vec::with_capacity(entries.len());
        let mut errors = Vec::new();
        for entry in entries {
            let Some(id) = record_id(&entry).map(str::to_string) else {
                continue;
            };
            match ctx.model().remove(&id).await {
                Ok(Some(r)) => removed.push(r),
                Ok(None) => errors.push(json!({ "_id": id, "message": "not found" })),
                Err(e) => {
                    tracing::warn!(entity = %ctx.entity(), id = %id, error = %e, "delete failed");
                    errors.push(json!({ "_id": id, "message": e.to_string() }));
                }
            }
        }
        let removed = self.visible_many(ctx, removed, None).await?;
        Ok(json!({ "removed": removed, "errors": errors }))
    }

    /// search, find, sort, skip, limit; in that order.
    async fn list(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let mut query = ctx.model().query();
        if let Some(search) = ctx.param("search").filter(|v| !v.is_null()) {
            query = query.search(scalar_string(search));
        }
        if let Some(find) = ctx.param("find") {
            let filter = Filter::parse(find)?;
            self.ensure_queryable(ctx, grant, filter.paths()).await?;
            query = query.filter(filter);
        }
        if let Some(sort) = ctx.param("sort") {
            let keys = SortKey::parse_spec(sort)?;
            self.ensure_queryable(ctx, grant, keys.iter().map(|k| k.path.as_str()).collect())
                .await?;
            query = query.sort(keys);
        }
        if let Some(skip) = ctx.param("skip").and_then(Value::as_u64) {
            query = query.skip(skip as usize);
        }
        // A zero limit means no limit was given.
        let limit = ctx
            .param("limit")
            .and_then(Value::as_u64)
            .filter(|l| *l > 0)
            .map(|l| l as usize)
            .unwrap_or(self.default_limit)
            .min(self.max_limit);
        query = query.limit(limit);

        let records = ctx.model().find(ctx.apply_query_filters(query)).await?;
        let visible = self.visible_many(ctx, records, Some(grant)).await?;
        Ok(Value::Array(visible))
    }

    async fn push(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let (id, path) = (require_id(ctx)?, require_path(ctx)?);
        ensure_granted(if grant.covers(path) { vec![] } else { vec![path.to_string()] })?;
        let body = ctx.new_entry();
        let value = body.get("push").cloned().unwrap_or(Value::Null);
        let multiple = truthy(body.get("multiple"));

        let current = self
            .find_entry(ctx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", ctx.entity(), id)))?;
        let mut doc = Value::Object(current);
        let items = get_path_mut(&mut doc, path)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| AppError::NotFound(not_found_path(id, Some(path))))?;
        match (multiple, value) {
            (true, Value::Array(values)) => items.extend(values),
            (true, _) => return Err(AppError::BadRequest("push with multiple expects an array".into())),
            (false, v) => items.push(v),
        }
        self.save_doc(ctx, grant, doc).await
    }

    /// Values come from the `pull` param (or body); objects in the sequence match on `_id`/`id`.
    async fn pull(&self, ctx: &ApiContext, grant: &Grant) -> Result<Value, AppError> {
        let (id, path) = (require_id(ctx)?, require_path(ctx)?);
        ensure_granted(if grant.covers(path) { vec![] } else { vec![path.to_string()] })?;
        let requested = ctx
            .param("pull")
            .or_else(|| ctx.new_entry().get("pull"))
            .cloned()
            .ok_or_else(|| AppError::BadRequest("pull expects a value".into()))?;
        let values = match requested {
            Value::Array(values) => values,
            v => vec![v],
        };

        let current = self
            .find_entry(ctx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", ctx.entity(), id)))?;
        let mut doc = Value::Object(current);
        let items = get_path_mut(&mut doc, path)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| AppError::NotFound(not_found_path(id, Some(path))))?;
        for v in &values {
            let pos = items
                .iter()
                .position(|item| member_matches(item, v))
                .ok_or_else(|| AppError::NotFound(format!("{} in {}", scalar_string(v), not_found_path(id, Some(path)))))?;
            items.remove(pos);
        }
        self.save_doc(ctx, grant, doc).await
    }

    async fn save_doc(&self, ctx: &ApiContext, grant: &Grant, doc: Value) -> Result<Value, AppError> {
        let Value::Object(record) = doc else {
            return Err(AppError::BadRequest("record is not an object".into()));
        };
        let saved = ctx.model().save(record).await?;
        self.visible_value(ctx, saved, Some(grant)).await
    }

    /// The addressed record, looked up through the query-filter chain.
    async fn find_entry(&self, ctx: &ApiContext) -> Result<Option<Record>, AppError> {
        let id = require_id(ctx)?;
        ctx.model()
            .find_by_id(id, ctx.apply_query_filters(Query::new()))
            .await
    }

    /// Paths a query references must be declared and readable by the caller.
    async fn ensure_queryable(&self, ctx: &ApiContext, grant: &Grant, paths: Vec<&str>) -> Result<(), AppError> {
        let mut entity_ctx = ctx.clone();
        let read = self.permissions.evaluate(Method::Read, &mut entity_ctx).await?;
        let schema = ctx.model().schema();
        let refused = paths
            .into_iter()
            .filter(|p| !(schema.declares(p) && grant.covers(p) && read.covers(p)))
            .map(str::to_string)
            .collect();
        ensure_granted(refused)
    }

    /// Apply the read grant of one record (or the request's override), narrowed by the method
    /// grant `also` (which always keeps `_id`). `None` when the record must not be shown at all.
    async fn visible(&self, ctx: &ApiContext, record: Record, also: Option<&Grant>) -> Result<Option<Record>, AppError> {
        let read = match ctx.read_override() {
            Some(g) => g.clone(),
            None => {
                let mut rctx = ctx.for_result(record.clone());
                self.permissions.evaluate(Method::Read, &mut rctx).await?
            }
        };
        let grant = match also {
            Some(g) => read.intersect(&g.with_field(ID_FIELD)),
            None => read,
        };
        if grant.is_denied() {
            return Ok(None);
        }
        Ok(Some(granted_view(&record, &grant)))
    }

    async fn visible_value(&self, ctx: &ApiContext, record: Record, also: Option<&Grant>) -> Result<Value, AppError> {
        Ok(self
            .visible(ctx, record, also)
            .await?
            .map(Value::Object)
            .unwrap_or(Value::Null))
    }

    async fn visible_many(&self, ctx: &ApiContext, records: Vec<Record>, also: Option<&Grant>) -> Result<Vec<Value>, AppError> {
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            if let Some(v) = self.visible(ctx, r, also).await? {
                out.push(Value::Object(v));
            }
        }
        Ok(out)
    }
}

/// The method's access hook refused the caller.
pub fn denied(ctx: &ApiContext) -> AppError {
    AppError::AccessDenied(format!("Access to {} {} was not granted.", ctx.method(), ctx.entity()))
}

fn require_id(ctx: &ApiContext) -> Result<&str, AppError> {
    ctx.id()
        .ok_or_else(|| AppError::BadRequest(format!("{} requires an entity id", ctx.method())))
}

fn require_path(ctx: &ApiContext) -> Result<&str, AppError> {
    ctx.entry_path()
        .ok_or_else(|| AppError::BadRequest(format!("{} requires a sub-path", ctx.method())))
}

fn not_found_path(id: &str, path: Option<&str>) -> String {
    match path {
        Some(p) => format!("{}/{}", id, p),
        None => id.to_string(),
    }
}

fn body_record(body: &Value) -> Result<Record, AppError> {
    match body {
        Value::Object(m) => Ok(m.clone()),
        Value::Null => Ok(Record::new()),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
        _ => false,
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn member_matches(item: &Value, wanted: &Value) -> bool {
    if loosely_equal(item, wanted) {
        return true;
    }
    match (item, wanted) {
        (Value::Object(obj), Value::Object(w)) => {
            let key = w.get(ID_FIELD).or_else(|| w.get("id"));
            key.is_some_and(|k| obj.get(ID_FIELD).or_else(|| obj.get("id")).is_some_and(|v| loosely_equal(v, k)))
        }
        (Value::Object(obj), scalar) => obj
            .get(ID_FIELD)
            .or_else(|| obj.get("id"))
            .is_some_and(|v| loosely_equal(v, scalar)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_match_by_value_or_identifier() {
        assert!(member_matches(&json!("a"), &json!("a")));
        assert!(member_matches(&json!(3), &json!("3")));
        assert!(member_matches(&json!({ "id": "x", "n": 1 }), &json!("x")));
        assert!(member_matches(&json!({ "_id": "x" }), &json!({ "_id": "x", "stale": true })));
        assert!(!member_matches(&json!({ "n": 1 }), &json!("x")));
    }

    #[test]
    fn truthiness_of_query_flags() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!("yes"))));
        assert!(!truthy(Some(&json!("false"))));
        assert!(!truthy(None));
    }
}
