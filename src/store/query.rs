//! Query: conjunction of filters, full-text search, sort, skip, limit.

use crate::error::AppError;
use crate::record::{record_get, Record};
use crate::store::filter::{compare_for_sort, Filter};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(path: impl Into<String>) -> Self {
        SortKey {
            path: path.into(),
            descending: false,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        SortKey {
            path: path.into(),
            descending: true,
        }
    }

    /// Parse a sort specification: `{"name": 1, "price": -1}`, an array of such objects
    /// (merged in order) or a string like `"name -price"`.
    pub fn parse_spec(spec: &Value) -> Result<Vec<SortKey>, AppError> {
        let mut keys: Vec<SortKey> = Vec::new();
        let mut push = |key: SortKey| {
            keys.retain(|k| k.path != key.path);
            keys.push(key);
        };
        match spec {
            Value::Object(m) => {
                for (path, dir) in m {
                    push(parse_direction(path, dir)?);
                }
            }
            Value::Array(items) => {
                for item in items {
                    for key in SortKey::parse_spec(item)? {
                        push(key);
                    }
                }
            }
            Value::String(s) => {
                for token in s.split(|c: char| c == ' ' || c == ',').filter(|t| !t.is_empty()) {
                    push(match token.strip_prefix('-') {
                        Some(path) => SortKey::desc(path),
                        None => SortKey::asc(token),
                    });
                }
            }
            Value::Null => {}
            _ => return Err(AppError::BadRequest("sort must be an object, array or string".into())),
        }
        Ok(keys)
    }
}

fn parse_direction(path: &str, dir: &Value) -> Result<SortKey, AppError> {
    let descending = match dir {
        Value::Number(n) => n.as_f64().is_some_and(|f| f < 0.0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "-1" | "desc" | "descending"),
        _ => return Err(AppError::BadRequest(format!("invalid sort direction for {}", path))),
    };
    Ok(SortKey {
        path: path.to_string(),
        descending,
    })
}

#[derive(Clone, Debug, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub search: Option<String>,
    pub sort: Vec<SortKey>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: Filter) -> Self {
        self.filters.push(f);
        self
    }

    pub fn search(mut self, terms: impl Into<String>) -> Self {
        self.search = Some(terms.into());
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(record))
    }

    /// Compare two records by the sort keys. Ties keep their store order.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.sort {
            let ord = compare_for_sort(record_get(a, &key.path), record_get(b, &key.path));
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Split search input into lowercase terms.
pub fn search_terms(search: &str) -> Vec<String> {
    search
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_spec_forms() {
        assert_eq!(
            SortKey::parse_spec(&json!({ "name": 1, "price": -1 })).unwrap(),
            vec![SortKey::asc("name"), SortKey::desc("price")]
        );
        assert_eq!(
            SortKey::parse_spec(&json!([{ "name": 1 }, { "name": "desc" }])).unwrap(),
            vec![SortKey::desc("name")]
        );
        assert_eq!(
            SortKey::parse_spec(&json!("name -price")).unwrap(),
            vec![SortKey::asc("name"), SortKey::desc("price")]
        );
    }

    #[test]
    fn compare_orders_by_keys_in_turn() {
        let q = Query::new().sort(vec![SortKey::asc("a"), SortKey::desc("b")]);
        let r = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(q.compare(&r(json!({ "a": 1, "b": 1 })), &r(json!({ "a": 2, "b": 9 }))), Ordering::Less);
        assert_eq!(q.compare(&r(json!({ "a": 1, "b": 1 })), &r(json!({ "a": 1, "b": 9 }))), Ordering::Greater);
    }
}
