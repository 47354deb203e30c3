//! Record validation from declared field rules.

use crate::error::AppError;
use crate::record::{record_get, Record};
use crate::store::filter::values_equal;
use crate::store::{FieldDef, FieldType};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

pub struct RecordValidator;

impl RecordValidator {
    /// Validate a full record: required fields must be present and every present field must
    /// satisfy its rules.
    pub fn validate(record: &Record, fields: &BTreeMap<String, FieldDef>) -> Result<(), AppError> {
        for (path, def) in fields {
            let val = record_get(record, path);
            if def.required && (val.is_none() || val == Some(&Value::Null)) {
                return Err(AppError::Validation(format!("{} is required", path)));
            }
            if let Some(v) = val {
                validate_field(path, v, def)?;
            }
        }
        Ok(())
    }
}

fn validate_field(path: &str, v: &Value, def: &FieldDef) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    validate_type(path, v, def.field_type)?;
    if let Some(format) = &def.format {
        validate_format(path, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = def.max_length {
            if len > max as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    path, max
                )));
            }
        }
        if let Some(min) = def.min_length {
            if len < min as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    path, min
                )));
            }
        }
        if let Some(ref pattern) = def.pattern {
            let re = Regex::new(pattern).map_err(|_| AppError::Validation(format!("invalid pattern for {}", path)))?;
            if !re.is_match(s) {
                return Err(AppError::Validation(format!("{} does not match required pattern", path)));
            }
        }
    }
    if let Some(ref allowed) = def.enum_values {
        if !allowed.iter().any(|a| values_equal(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {:?}",
                path,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = def.minimum {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", path, min)));
            }
        }
        if let Some(max) = def.maximum {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", path, max)));
            }
        }
    }
    Ok(())
}

fn validate_type(path: &str, v: &Value, ty: FieldType) -> Result<(), AppError> {
    let ok = match ty {
        FieldType::String => v.is_string(),
        FieldType::Number => v.is_number(),
        FieldType::Boolean => v.is_boolean(),
        FieldType::Date => match v {
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
            Value::Number(_) => true,
            _ => false,
        },
        FieldType::Id => v.as_str().is_some_and(crate::record::is_valid_id),
        FieldType::Array => v.is_array(),
        FieldType::Object => v.is_object(),
        FieldType::Mixed => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{} must be of type {}",
            path,
            ty.instance()
        )))
    }
}

fn validate_format(path: &str, v: &Value, format: &str) -> Result<(), AppError> {
    match format.to_lowercase().as_str() {
        "email" => {
            if let Some(s) = v.as_str() {
                if !s.contains('@') || s.len() < 3 {
                    return Err(AppError::Validation(format!("{} must be a valid email", path)));
                }
            }
        }
        "uuid" => {
            if let Some(s) = v.as_str() {
                if uuid::Uuid::parse_str(s).is_err() {
                    return Err(AppError::Validation(format!("{} must be a valid UUID", path)));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
