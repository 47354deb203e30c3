//! Access filtering of records and write-side grant enforcement.

use crate::access::Grant;
use crate::error::AppError;
use crate::record::{flatten, pick, record_get, Record, ID_FIELD};
use crate::store::filter::values_equal;
use serde_json::Value;

/// Retain only granted fields. Arrays are filtered element-wise.
///
/// A `Denied` grant never reaches here on the request path; if it does, the call fails.
pub fn filter_access(value: Value, grant: &Grant) -> Result<Value, AppError> {
    match grant {
        Grant::Unrestricted => Ok(value),
        Grant::Denied => Err(AppError::AccessDenied("access denied".into())),
        Grant::Fields(fields) => Ok(match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|v| match v {
                        Value::Object(r) => Value::Object(pick(&r, fields)),
                        other => other,
                    })
                    .collect(),
            ),
            Value::Object(r) => Value::Object(pick(&r, fields)),
            other => other,
        }),
    }
}

/// The part of `requested` a grant lets through.
pub fn granted_view(requested: &Record, grant: &Grant) -> Record {
    match grant {
        Grant::Unrestricted => requested.clone(),
        Grant::Denied => Record::new(),
        Grant::Fields(fields) => pick(requested, fields),
    }
}

/// Leaf paths present in `requested` that the grant does not cover.
pub fn not_granted(requested: &Record, grant: &Grant) -> Vec<String> {
    flatten(requested)
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| !grant.covers(path))
        .collect()
}

/// Leaf paths of `proposed` whose value differs from `current`. `_id` never counts.
pub fn changed_paths(current: &Record, proposed: &Record) -> Vec<String> {
    flatten(proposed)
        .into_iter()
        .filter(|(path, _)| path != ID_FIELD)
        .filter(|(path, value)| match record_get(current, path) {
            Some(existing) => !same_value(existing, value),
            None => !value.is_null(),
        })
        .map(|(path, _)| path)
        .collect()
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(p, q)| same_value(p, q)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => values_equal(a, b),
    }
}

/// Reject with the access-denied message listing the offending paths.
pub fn ensure_granted(paths: Vec<String>) -> Result<(), AppError> {
    if paths.is_empty() {
        Ok(())
    } else {
        Err(AppError::AccessDenied(format!(
            "Access to {} were not granted.",
            paths.join(",")
        )))
    }
}
