//! Entity declarations: data loaded from declaration files plus hooks attached in code.

use crate::access::{hook, AccessHook, Grant, Hook};
use crate::controller::Controller;
use crate::method::Method;
use crate::plugin::flux::{Delivery, FluxContext, FluxEvent, FluxHooks, FluxRules, PayloadContext};
use crate::store::{FieldDef, Model, ModelMap, SchemaDefinition};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub type SchemaHook = Arc<dyn Fn(&mut SchemaDefinition) + Send + Sync>;
pub type ModelHook = Arc<dyn Fn(&Model, &ModelMap) + Send + Sync>;

/// Field definitions and lifecycle hooks of one entity's persisted records.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelDescriptor {
    pub fields: BTreeMap<String, FieldDef>,
    pub text_index: Vec<String>,
    /// Default sort specification, same forms as the `sort` list parameter.
    pub sort: Option<Value>,
    #[serde(skip)]
    pub on_schema_created: Option<SchemaHook>,
    #[serde(skip)]
    pub on_model_created: Option<ModelHook>,
}

impl ModelDescriptor {
    /// Overlay `other` on top of `self`: fields merge with `other` winning, hooks are replaced when set.
    fn overlay(&mut self, other: &ModelDescriptor) {
        for (k, v) in &other.fields {
            self.fields.insert(k.clone(), v.clone());
        }
        for f in &other.text_index {
            if !self.text_index.contains(f) {
                self.text_index.push(f.clone());
            }
        }
        if other.sort.is_some() {
            self.sort = other.sort.clone();
        }
        if other.on_schema_created.is_some() {
            self.on_schema_created = other.on_schema_created.clone();
        }
        if other.on_model_created.is_some() {
            self.on_model_created = other.on_model_created.clone();
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityDeclaration {
    pub name: String,
    pub extend: Option<String>,
    pub discriminator: Option<String>,
    pub model: ModelDescriptor,
    /// Grants given as data, e.g. `{"list": false, "create": ["name"]}`.
    #[serde(rename = "access")]
    pub access_rules: BTreeMap<Method, Grant>,
    /// Delivery groups given as data, e.g. `{"access": {"create": true}}`.
    #[serde(rename = "flux")]
    pub flux_rules: FluxRules,
    #[serde(skip)]
    pub access: HashMap<Method, Hook>,
    #[serde(skip)]
    pub flux: FluxHooks,
    #[serde(skip)]
    pub controller: HashMap<String, Arc<dyn Controller>>,
}

impl EntityDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        EntityDeclaration {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn extend(mut self, base: impl Into<String>) -> Self {
        self.extend = Some(base.into());
        self
    }

    pub fn discriminate(mut self, base: impl Into<String>) -> Self {
        self.discriminator = Some(base.into());
        self
    }

    pub fn field(mut self, path: impl Into<String>, def: FieldDef) -> Self {
        self.model.fields.insert(path.into(), def);
        self
    }

    pub fn text_index<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model.text_index.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn default_sort(mut self, spec: Value) -> Self {
        self.model.sort = Some(spec);
        self
    }

    pub fn access<H: AccessHook + 'static>(mut self, method: Method, h: H) -> Self {
        self.access.insert(method, hook(h));
        self
    }

    pub fn flux_access<F>(mut self, event: FluxEvent, f: F) -> Self
    where
        F: Fn(&FluxContext<'_>) -> Delivery + Send + Sync + 'static,
    {
        self.flux.access.insert(event, Arc::new(f));
        self
    }

    pub fn flux_payload<F>(mut self, event: FluxEvent, f: F) -> Self
    where
        F: Fn(&PayloadContext<'_>) -> Option<Value> + Send + Sync + 'static,
    {
        self.flux.payload.insert(event, Arc::new(f));
        self
    }

    pub fn controller<C: Controller + 'static>(mut self, name: impl Into<String>, c: C) -> Self {
        self.controller.insert(name.into(), Arc::new(c));
        self
    }

    pub fn on_schema_created<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SchemaDefinition) + Send + Sync + 'static,
    {
        self.model.on_schema_created = Some(Arc::new(f));
        self
    }

    pub fn on_model_created<F>(mut self, f: F) -> Self
    where
        F: Fn(&Model, &ModelMap) + Send + Sync + 'static,
    {
        self.model.on_model_created = Some(Arc::new(f));
        self
    }

    /// Turn data rules into hooks. Hooks already registered for a method are kept.
    pub fn normalize(&mut self) {
        for (m, g) in &self.access_rules {
            self.access.entry(*m).or_insert_with(|| hook(g.clone()));
        }
        self.flux.absorb(&self.flux_rules);
    }

    /// Overlay `other` on top of `self`; `other` wins on every conflict.
    pub fn overlay(&mut self, other: &EntityDeclaration) {
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
        if other.extend.is_some() {
            self.extend = other.extend.clone();
        }
        if other.discriminator.is_some() {
            self.discriminator = other.discriminator.clone();
        }
        self.model.overlay(&other.model);
        for (m, g) in &other.access_rules {
            self.access_rules.insert(*m, g.clone());
        }
        self.flux_rules.overlay(&other.flux_rules);
        self.overlay_access(other);
        self.flux.overlay(&other.flux);
        for (k, c) in &other.controller {
            self.controller.insert(k.clone(), c.clone());
        }
    }

    /// Merge an ancestor's access hooks under this declaration's own.
    pub fn inherit_access(&mut self, ancestor: &EntityDeclaration) {
        for (m, h) in &ancestor.access {
            self.access.entry(*m).or_insert_with(|| h.clone());
        }
    }

    fn overlay_access(&mut self, other: &EntityDeclaration) {
        for (m, h) in &other.access {
            self.access.insert(*m, h.clone());
        }
    }
}

impl fmt::Debug for EntityDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDeclaration")
            .field("name", &self.name)
            .field("extend", &self.extend)
            .field("discriminator", &self.discriminator)
            .field("fields", &self.model.fields.keys().collect::<Vec<_>>())
            .field("access", &self.access.keys().collect::<Vec<_>>())
            .field("controller", &self.controller.keys().collect::<Vec<_>>())
            .finish()
    }
}
