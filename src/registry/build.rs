use crate::access::get_permissions;
use crate::config::{build_order, DeclarationMap, DeclarationSource, EntityDeclaration};
use crate::error::RegistryError;
use crate::registry::{Initialized, LifecycleListener};
use crate::store::{DocumentStore, Model, ModelMap, SchemaDefinition, SortKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Load, order and build every declaration. Fails as a whole: there is no partial registry.
pub async fn build(
    source: &DeclarationSource,
    store: Arc<dyn DocumentStore>,
    listener: &dyn LifecycleListener,
) -> Result<Initialized, RegistryError> {
    let declarations = source.load().await?;
    let order = build_order(&declarations)?;

    let mut resolved: HashMap<String, EntityDeclaration> = HashMap::with_capacity(declarations.len());
    let mut models: ModelMap = HashMap::with_capacity(declarations.len());

    for i in order {
        let mut decl = inherit(&declarations[i], &resolved);
        let ancestor = decl
            .extend
            .as_deref()
            .or(decl.discriminator.as_deref())
            .and_then(|name| resolved.get(name));

        let mut schema = schema_for(&decl, decl.discriminator.as_deref().and_then(|b| resolved.get(b)))?;
        if let Some(hook) = &decl.model.on_schema_created {
            hook(&mut schema);
        }
        listener.schema_created(&mut schema, &decl);

        let model = match decl.discriminator.as_deref() {
            Some(base) => {
                let base_model = models.get(base).ok_or_else(|| RegistryError::MissingDependency {
                    entity: decl.name.clone(),
                    target: base.to_string(),
                })?;
                Model::discriminated(base_model, schema).await?
            }
            None => Model::top_level(schema, store.clone()).await?,
        };

        if let Some(ancestor) = ancestor.cloned() {
            decl.inherit_access(&ancestor);
        }
        if let Some(hook) = &decl.model.on_model_created {
            hook(&model, &models);
        }
        listener.model_created(&model, &decl);
        tracing::info!(
            entity = %decl.name,
            collection = %model.collection(),
            base = ?model.base(),
            "model built"
        );

        models.insert(decl.name.clone(), Arc::new(model));
        resolved.insert(decl.name.clone(), decl);
    }

    let final_order = declarations
        .iter()
        .filter_map(|d| resolved.remove(&d.name))
        .collect();
    let declarations = DeclarationMap::new(final_order);
    let permissions = get_permissions(&declarations);
    let built = Initialized {
        declarations,
        models,
        permissions,
    };
    listener.entity_map_ready(&built).await?;
    Ok(built)
}

/// Merge an `extend` target under the declaration; the declaration keeps its own name and links.
fn inherit(decl: &EntityDeclaration, resolved: &HashMap<String, EntityDeclaration>) -> EntityDeclaration {
    match decl.extend.as_deref().and_then(|base| resolved.get(base)) {
        Some(base) => {
            let mut merged = base.clone();
            merged.overlay(decl);
            merged.name = decl.name.clone();
            merged.extend = decl.extend.clone();
            merged.discriminator = decl.discriminator.clone();
            merged
        }
        None => decl.clone(),
    }
}

/// The record definition: a discriminated entity starts from its base's fields and text index.
fn schema_for(decl: &EntityDeclaration, base: Option<&EntityDeclaration>) -> Result<SchemaDefinition, RegistryError> {
    let mut schema = SchemaDefinition::new(decl.name.clone());
    let mut sort_spec = decl.model.sort.as_ref();
    if let Some(base) = base {
        for (path, def) in &base.model.fields {
            schema.add_field(path.clone(), def.clone());
        }
        schema.text_index.extend(base.model.text_index.iter().cloned());
        sort_spec = sort_spec.or(base.model.sort.as_ref());
    }
    for (path, def) in &decl.model.fields {
        schema.add_field(path.clone(), def.clone());
    }
    for field in &decl.model.text_index {
        if !schema.text_index.contains(field) {
            schema.text_index.push(field.clone());
        }
    }
    if let Some(spec) = sort_spec {
        schema.default_sort =
            SortKey::parse_spec(spec).map_err(|e| RegistryError::Load(format!("{}: default sort: {}", decl.name, e)))?;
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Grant;
    use crate::context::{ApiContext, Principal};
    use crate::method::Method;
    use crate::registry::NoopListener;
    use crate::store::{FieldDef, FieldType, MemoryStore};

    fn source() -> DeclarationSource {
        DeclarationSource::default()
            .with_declaration(
                EntityDeclaration::new("user")
                    .field("email", FieldDef::new(FieldType::String).required())
                    .field("level", FieldDef::new(FieldType::String))
                    .text_index(["email"])
                    .access(Method::Create, Grant::Unrestricted),
            )
            .with_declaration(
                EntityDeclaration::new("provider")
                    .discriminate("user")
                    .field("company", FieldDef::new(FieldType::String)),
            )
            .with_declaration(
                EntityDeclaration::new("admin")
                    .extend("user")
                    .field("level", FieldDef::new(FieldType::String).required()),
            )
    }

    #[tokio::test]
    async fn discriminated_models_share_the_base_collection_and_fields() {
        let built = build(&source(), Arc::new(MemoryStore::new()), &NoopListener).await.unwrap();
        let provider = built.model("provider").unwrap();
        assert_eq!(provider.collection(), "user");
        assert_eq!(provider.base(), Some("user"));
        assert!(provider.schema().fields.contains_key("email"));
        assert!(provider.schema().fields.contains_key("company"));
        assert_eq!(provider.schema().text_index, vec!["email"]);
    }

    #[tokio::test]
    async fn extended_declarations_get_their_own_collection_and_merged_fields() {
        let built = build(&source(), Arc::new(MemoryStore::new()), &NoopListener).await.unwrap();
        let admin = built.model("admin").unwrap();
        assert_eq!(admin.collection(), "admin");
        assert!(admin.schema().fields["level"].required);
        assert!(admin.schema().fields.contains_key("email"));
    }

    #[tokio::test]
    async fn access_is_inherited_unless_overridden() {
        let built = build(&source(), Arc::new(MemoryStore::new()), &NoopListener).await.unwrap();
        let perms = built.permissions.get("provider").unwrap();
        let model = built.model("provider").unwrap().clone();
        let mut anonymous = ApiContext::new(model, Method::Create);
        assert_eq!(perms.evaluate(Method::Create, &mut anonymous).await.unwrap(), Grant::Unrestricted);
        let mut delete = ApiContext::new(built.model("provider").unwrap().clone(), Method::Delete);
        assert_eq!(perms.evaluate(Method::Delete, &mut delete).await.unwrap(), Grant::Denied);
        let mut delete = delete.with_user(Some(Principal::new("u1")));
        assert_eq!(perms.evaluate(Method::Delete, &mut delete).await.unwrap(), Grant::Unrestricted);
    }

    #[tokio::test]
    async fn declaration_map_keeps_load_order() {
        let built = build(&source(), Arc::new(MemoryStore::new()), &NoopListener).await.unwrap();
        assert_eq!(built.declarations.names().collect::<Vec<_>>(), vec!["user", "provider", "admin"]);
    }
}
