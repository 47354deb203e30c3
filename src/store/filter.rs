//! The store-native filter language: a typed subset of document-store query objects.
//!
//! `{"price": {"$gte": 1}, "$or": [{"name": "a"}, {"tags": "b"}]}`

use crate::error::AppError;
use crate::record::{record_get, Record};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Clone, Debug)]
pub enum Filter {
    Cmp { path: String, op: CmpOp, value: Value },
    In { path: String, values: Vec<Value>, negate: bool },
    Exists { path: String, present: bool },
    Regex { path: String, regex: Regex, case_insensitive: bool },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            path: path.into(),
            op: CmpOp::Eq,
            value: value.into(),
        }
    }

    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            path: crate::record::ID_FIELD.to_string(),
            values: ids.into_iter().map(|s| Value::String(s.into())).collect(),
            negate: false,
        }
    }

    /// Parse a filter object. Top-level keys are ANDed.
    pub fn parse(value: &Value) -> Result<Filter, AppError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AppError::BadRequest("filter must be an object".into()))?;
        let mut parts = Vec::with_capacity(obj.len());
        for (key, v) in obj {
            match key.as_str() {
                "$and" | "$or" => {
                    let branches = v
                        .as_array()
                        .ok_or_else(|| AppError::BadRequest(format!("{} expects an array", key)))?
                        .iter()
                        .map(Filter::parse)
                        .collect::<Result<Vec<_>, _>>()?;
                    parts.push(if key == "$and" {
                        Filter::And(branches)
                    } else {
                        Filter::Or(branches)
                    });
                }
                k if k.starts_with('$') => {
                    return Err(AppError::BadRequest(format!("unsupported filter operator {}", k)));
                }
                path => parts.extend(parse_field(path, v)?),
            }
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::And(parts)
        })
    }

    /// Field paths this filter reads.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Cmp { path, .. }
            | Filter::In { path, .. }
            | Filter::Exists { path, .. }
            | Filter::Regex { path, .. } => out.push(path),
            Filter::And(fs) | Filter::Or(fs) => fs.iter().for_each(|f| f.collect_paths(out)),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Cmp { path, op, value } => {
                let field = record_get(record, path);
                match op {
                    CmpOp::Eq => field_equals(field, value),
                    CmpOp::Ne => !field_equals(field, value),
                    _ => candidates(field).any(|c| {
                        compare_same_kind(c, value).is_some_and(|ord| match op {
                            CmpOp::Gt => ord == Ordering::Greater,
                            CmpOp::Gte => ord != Ordering::Less,
                            CmpOp::Lt => ord == Ordering::Less,
                            CmpOp::Lte => ord != Ordering::Greater,
                            CmpOp::Eq | CmpOp::Ne => false,
                        })
                    }),
                }
            }
            Filter::In { path, values, negate } => {
                let field = record_get(record, path);
                let hit = values.iter().any(|v| field_equals(field, v));
                hit != *negate
            }
            Filter::Exists { path, present } => record_get(record, path).is_some() == *present,
            Filter::Regex { path, regex, .. } => {
                candidates(record_get(record, path)).any(|c| c.as_str().is_some_and(|s| regex.is_match(s)))
            }
            Filter::And(fs) => fs.iter().all(|f| f.matches(record)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(record)),
        }
    }
}

fn parse_field(path: &str, v: &Value) -> Result<Vec<Filter>, AppError> {
    let ops = match v {
        Value::Object(m) if !m.is_empty() && m.keys().all(|k| k.starts_with('$')) => m,
        other => return Ok(vec![Filter::eq(path, other.clone())]),
    };
    let case_insensitive = ops
        .get("$options")
        .and_then(Value::as_str)
        .is_some_and(|o| o.contains('i'));
    let mut out = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let cmp = |op: CmpOp| Filter::Cmp {
            path: path.to_string(),
            op,
            value: arg.clone(),
        };
        out.push(match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$ne" => cmp(CmpOp::Ne),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$in" | "$nin" => Filter::In {
                path: path.to_string(),
                values: arg
                    .as_array()
                    .cloned()
                    .ok_or_else(|| AppError::BadRequest(format!("{} expects an array", op)))?,
                negate: op == "$nin",
            },
            "$exists" => Filter::Exists {
                path: path.to_string(),
                present: arg.as_bool().unwrap_or(true),
            },
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| AppError::BadRequest("$regex expects a string".into()))?;
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| AppError::BadRequest(format!("invalid $regex: {}", e)))?;
                Filter::Regex {
                    path: path.to_string(),
                    regex,
                    case_insensitive,
                }
            }
            "$options" => continue,
            other => return Err(AppError::BadRequest(format!("unsupported filter operator {}", other))),
        });
    }
    Ok(out)
}

/// The field value itself plus, for arrays, each element.
fn candidates(field: Option<&Value>) -> impl Iterator<Item = &Value> {
    let (whole, elements) = match field {
        Some(Value::Array(items)) => (field, items.as_slice()),
        Some(_) => (field, &[][..]),
        None => (None, &[][..]),
    };
    whole.into_iter().chain(elements.iter())
}

/// Equality with document-store semantics: a missing field equals null, an array field
/// equals a scalar it contains.
fn field_equals(field: Option<&Value>, value: &Value) -> bool {
    match field {
        None => value.is_null(),
        Some(f) => candidates(Some(f)).any(|c| values_equal(c, value)),
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: missing/null first, then numbers, strings, booleans, everything else.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Bool(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_same_kind(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}
