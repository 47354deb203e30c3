//! Schema introspection at `GET {entities_uri}`.

use crate::context::Principal;
use crate::error::AppError;
use crate::plugin::{Exchange, Flow, Plugin, PluginApi};
use crate::record::ID_FIELD;
use crate::registry::Initialized;
use crate::store::{FieldType, SchemaDefinition};
use async_trait::async_trait;
use axum::http::Method as Verb;
use serde_json::{json, Map, Value};
use std::sync::Arc;

type SchemaAccess = Arc<dyn Fn(Option<&Principal>, &str) -> bool + Send + Sync>;

pub struct SchemasPlugin {
    access: SchemaAccess,
}

impl SchemasPlugin {
    /// Every entity visible to every caller.
    pub fn new() -> Self {
        SchemasPlugin {
            access: Arc::new(|_, _| true),
        }
    }

    /// Decide per caller and entity whether its schema is listed.
    pub fn with_access<F>(f: F) -> Self
    where
        F: Fn(Option<&Principal>, &str) -> bool + Send + Sync + 'static,
    {
        SchemasPlugin { access: Arc::new(f) }
    }
}

impl Default for SchemasPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// `{path: {path, instance, options}}` for one entity, `_id` included.
pub fn describe(schema: &SchemaDefinition) -> Value {
    let mut fields = Map::new();
    fields.insert(
        ID_FIELD.into(),
        json!({ "path": ID_FIELD, "instance": FieldType::Id.instance(), "options": {} }),
    );
    for (path, def) in &schema.fields {
        let mut entry = json!({
            "path": path,
            "instance": def.field_type.instance(),
            "options": def,
        });
        if let Some(values) = &def.enum_values {
            entry["enumValues"] = Value::Array(values.clone());
        }
        fields.insert(path.clone(), entry);
    }
    Value::Object(fields)
}

fn describe_all(entities: &Initialized, user: Option<&Principal>, access: &SchemaAccess) -> Value {
    let mut out = Map::new();
    for name in entities.declarations.names() {
        if !access(user, name) {
            continue;
        }
        if let Some(model) = entities.model(name) {
            out.insert(name.to_string(), describe(model.schema()));
        }
    }
    Value::Object(out)
}

#[async_trait]
impl Plugin for SchemasPlugin {
    fn name(&self) -> &'static str {
        "schemas"
    }

    async fn prepare(&self, ex: &mut Exchange, api: &PluginApi) -> Result<Flow, AppError> {
        let uri = api.config().entities_uri.trim_end_matches('/');
        if ex.request.verb == Verb::GET && ex.request.path.trim_end_matches('/') == uri {
            ex.result = Some(describe_all(&ex.entities, ex.user.as_ref(), &self.access));
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldDef;

    #[test]
    fn describes_fields_with_instance_and_options() {
        let mut schema = SchemaDefinition::new("product");
        schema.add_field("name", FieldDef::new(FieldType::String).required());
        schema.add_field("kind", FieldDef::new(FieldType::String).one_of(["a", "b"]));
        let d = describe(&schema);
        assert_eq!(d["_id"]["instance"], "ObjectId");
        assert_eq!(d["name"], json!({ "path": "name", "instance": "String", "options": { "type": "string", "required": true } }));
        assert_eq!(d["kind"]["enumValues"], json!(["a", "b"]));
    }
}
