//! Query-string decoding: bracketed keys become nested objects/arrays and scalar
//! strings are coerced (numbers, booleans, embedded JSON).

use serde_json::{Map, Value};

/// `-?\d+(\.\d+)?`
fn looks_numeric(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map_or(true, all_digits)
}

/// Parse a raw query string into a coerced JSON object.
///
/// `find[name]=x&id[]=a&id[]=b&limit=10` -> `{"find":{"name":"x"},"id":["a","b"],"limit":10}`
pub fn parse_query(raw: &str) -> Value {
    let mut root = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let path = split_key(&key);
        if path.is_empty() {
            continue;
        }
        insert_path(&mut root, &path, Value::String(value.into_owned()));
    }
    coerce(Value::Object(root))
}

/// `a[b][]` -> ["a", "b", ""]
fn split_key(key: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let (head, mut rest) = match key.find('[') {
        Some(i) => (&key[..i], &key[i..]),
        None => (key, ""),
    };
    if head.is_empty() {
        return parts;
    }
    parts.push(head.to_string());
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(end) => {
                parts.push(stripped[..end].to_string());
                rest = &stripped[end + 1..];
            }
            None => break,
        }
    }
    parts
}

fn insert_path(obj: &mut Map<String, Value>, path: &[String], value: Value) {
    let key = &path[0];
    if path.len() == 1 {
        match obj.get_mut(key) {
            Some(Value::Array(arr)) => arr.push(value),
            Some(existing) => {
                let prev = existing.take();
                *existing = Value::Array(vec![prev, value]);
            }
            None => {
                obj.insert(key.clone(), value);
            }
        }
        return;
    }
    if path[1].is_empty() {
        let slot = obj.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(arr) => arr.push(value),
            other => {
                let prev = other.take();
                *other = Value::Array(vec![prev, value]);
            }
        }
        return;
    }
    let slot = obj.entry(key.clone()).or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(child) = slot {
        insert_path(child, &path[1..], value);
    }
}

/// Recursively coerce string leaves: integer/decimal-looking strings become numbers,
/// `"true"`/`"false"` become booleans, strings holding JSON are parsed.
/// Array elements are left as sent.
pub fn coerce(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, coerce(v))).collect()),
        Value::String(s) => coerce_str(s),
        other => other,
    }
}

fn coerce_str(s: String) -> Value {
    if looks_numeric(&s) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::Number(n.into());
        }
        if let Some(n) = s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    match s.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if s.starts_with('{') || s.starts_with('[') || s.starts_with('"') {
        if let Ok(v) = serde_json::from_str::<Value>(&s) {
            return v;
        }
    }
    Value::String(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numbers_and_booleans() {
        let v = parse_query("skip=2&limit=10&price=1.5&many=true&name=kombucha");
        assert_eq!(v, json!({ "skip": 2, "limit": 10, "price": 1.5, "many": true, "name": "kombucha" }));
    }

    #[test]
    fn bracketed_keys_nest_and_coerce_recursively() {
        let v = parse_query("find[price][$gte]=1&find[name]=x&sort[name]=-1");
        assert_eq!(v, json!({ "find": { "price": { "$gte": 1 }, "name": "x" }, "sort": { "name": -1 } }));
    }

    #[test]
    fn repeated_and_empty_brackets_build_arrays() {
        let v = parse_query("id[]=a&id[]=b&pull=1&pull=2");
        assert_eq!(v, json!({ "id": ["a", "b"], "pull": ["1", "2"] }));
    }

    #[test]
    fn embedded_json_is_parsed() {
        let v = parse_query("find=%7B%22name%22%3A%22x%22%7D");
        assert_eq!(v, json!({ "find": { "name": "x" } }));
    }
}
