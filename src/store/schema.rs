//! Persisted-record definitions: declared fields, text index, virtuals and persistence observers.

use crate::record::{Record, ID_FIELD};
use crate::store::model::PersistObserver;
use crate::store::SortKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Id,
    Array,
    Object,
    #[default]
    Mixed,
}

impl FieldType {
    /// Type name reported by schema introspection.
    pub fn instance(&self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Number => "Number",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::Id => "ObjectId",
            FieldType::Array => "Array",
            FieldType::Object => "Embedded",
            FieldType::Mixed => "Mixed",
        }
    }

    /// Whether undeclared sub-paths below a field of this type are addressable.
    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::Array | FieldType::Object | FieldType::Mixed)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Entity an `id` field points at.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        FieldDef {
            field_type,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn reference(mut self, entity: impl Into<String>) -> Self {
        self.reference = Some(entity.into());
        self
    }
}

/// A computed field, added to every record leaving the model and never persisted.
#[derive(Clone)]
pub struct Virtual {
    pub name: String,
    compute: Arc<dyn Fn(&Record) -> Value + Send + Sync>,
}

impl Virtual {
    pub fn compute(&self, record: &Record) -> Value {
        (self.compute)(record)
    }
}

impl fmt::Debug for Virtual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Virtual").field("name", &self.name).finish()
    }
}

#[derive(Clone, Default)]
pub struct SchemaDefinition {
    pub entity: String,
    pub fields: BTreeMap<String, FieldDef>,
    pub text_index: Vec<String>,
    pub default_sort: Vec<SortKey>,
    virtuals: Vec<Virtual>,
    observers: Vec<Arc<dyn PersistObserver>>,
}

impl SchemaDefinition {
    pub fn new(entity: impl Into<String>) -> Self {
        SchemaDefinition {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn add_field(&mut self, path: impl Into<String>, def: FieldDef) -> &mut Self {
        self.fields.insert(path.into(), def);
        self
    }

    pub fn add_virtual<F>(&mut self, name: impl Into<String>, compute: F) -> &mut Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.virtuals.push(Virtual {
            name: name.into(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Register a persistence observer (post-save/post-remove hooks).
    pub fn observe(&mut self, observer: Arc<dyn PersistObserver>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    pub fn virtuals(&self) -> &[Virtual] {
        &self.virtuals
    }

    pub fn observers(&self) -> &[Arc<dyn PersistObserver>] {
        &self.observers
    }

    /// Whether `path` names a declared field, a parent of one, or a sub-path of a container field.
    pub fn declares(&self, path: &str) -> bool {
        if path == ID_FIELD || self.fields.contains_key(path) {
            return true;
        }
        self.fields.iter().any(|(f, def)| {
            let below = path.strip_prefix(f.as_str()).is_some_and(|r| r.starts_with('.'));
            let above = f.strip_prefix(path).is_some_and(|r| r.starts_with('.'));
            above || (below && def.field_type.is_container())
        })
    }
}

impl fmt::Debug for SchemaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDefinition")
            .field("entity", &self.entity)
            .field("fields", &self.fields)
            .field("text_index", &self.text_index)
            .field("virtuals", &self.virtuals)
            .field("observers", &self.observers.len())
            .finish()
    }
}
