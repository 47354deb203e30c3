//! Records are JSON objects keyed by field name; nested fields are addressed with dotted paths.

use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// Reserved id field.
pub const ID_FIELD: &str = "_id";
/// Discriminator tag stamped on records of discriminated models.
pub const TYPE_TAG_FIELD: &str = "__t";
/// Opt-out sentinel: a record carrying it is persisted without flux delivery.
pub const NO_FLUX_FIELD: &str = "$noFlux";

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn is_valid_id(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

/// Resolve `a.b.0.c` against a value. Numeric segments index into arrays.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(m) => m.get(seg)?,
            Value::Array(a) => a.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut cur = value;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(m) => m.get_mut(seg)?,
            Value::Array(a) => a.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub fn record_get<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };
    let v = record.get(head)?;
    match rest {
        Some(r) => get_path(v, r),
        None => Some(v),
    }
}

/// Set a dotted path, creating intermediate objects. Existing non-object intermediates are replaced.
pub fn set_path(record: &mut Record, path: &str, value: Value) {
    let mut segs = path.split('.').peekable();
    let mut cur = record;
    while let Some(seg) = segs.next() {
        if segs.peek().is_none() {
            cur.insert(seg.to_string(), value);
            return;
        }
        let slot = cur.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cur = match slot {
            Value::Object(m) => m,
            _ => return,
        };
    }
}

/// Keep only the listed paths (lodash `pick` semantics: dotted paths keep their nesting).
pub fn pick<'a, I>(record: &Record, paths: I) -> Record
where
    I: IntoIterator<Item = &'a String>,
{
    let mut out = Record::new();
    for path in paths {
        if let Some(v) = record_get(record, path) {
            set_path(&mut out, path, v.clone());
        }
    }
    out
}

/// Leaf paths of an object. Arrays and non-object values are leaves; empty objects are leaves.
pub fn flatten(record: &Record) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(record, "", &mut out);
    out
}

fn flatten_into(map: &Record, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (k, v) in map {
        let path = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
        match v {
            Value::Object(child) if !child.is_empty() => flatten_into(child, &path, out),
            _ => out.push((path, v.clone())),
        }
    }
}

/// Write every leaf of `source` into `target` by path. Arrays replace wholesale.
pub fn merge_paths(target: &mut Record, source: &Record) {
    for (path, value) in flatten(source) {
        set_path(target, &path, value);
    }
}

/// Deep-merge `overlay` into `base`: objects merge key by key, everything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (b, o) => *b = o,
    }
}

/// Loose equality used when matching sequence members: numbers compare numerically
/// and scalars compare by their string form (query strings deliver strings).
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => a == b,
        _ => scalar_string(a) == scalar_string(b),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn pick_keeps_nested_paths() {
        let r = rec(json!({ "a": 1, "dfa": { "installed": true, "secret": "s" }, "b": 2 }));
        let picked = pick(&r, &["a".to_string(), "dfa.installed".to_string()]);
        assert_eq!(Value::Object(picked), json!({ "a": 1, "dfa": { "installed": true } }));
    }

    #[test]
    fn merge_paths_sets_leaves_and_replaces_arrays() {
        let mut target = rec(json!({ "name": "a", "meta": { "x": 1, "y": 2 }, "tags": [1, 2, 3] }));
        merge_paths(&mut target, &rec(json!({ "meta": { "y": 5 }, "tags": [9] })));
        assert_eq!(Value::Object(target), json!({ "name": "a", "meta": { "x": 1, "y": 5 }, "tags": [9] }));
    }

    #[test]
    fn get_path_indexes_arrays() {
        let v = json!({ "products": [{ "name": "a" }, { "name": "b" }] });
        assert_eq!(get_path(&v, "products.1.name"), Some(&json!("b")));
        assert_eq!(get_path(&v, "products.5.name"), None);
    }

    #[test]
    fn loose_equality_bridges_query_strings() {
        assert!(loosely_equal(&json!("2"), &json!(2)));
        assert!(loosely_equal(&json!(1.0), &json!(1)));
        assert!(!loosely_equal(&json!({ "a": 1 }), &json!("a")));
    }
}
