//! Flux: post-persist delivery of accepted mutations to real-time subscriber groups.
//!
//! Delivery runs from the model's persistence observers, so every code path that writes
//! through a [`Model`](crate::store::Model) notifies, not only the HTTP surface.

use crate::config::{DeclarationMap, EntityDeclaration};
use crate::error::AppError;
use crate::plugin::io::RealtimeHandle;
use crate::plugin::{Plugin, PluginApi};
use crate::record::{Record, NO_FLUX_FIELD};
use crate::registry::Initialized;
use crate::store::{PersistObserver, SchemaDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// The persistence events flux delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FluxEvent {
    Create,
    Update,
    Delete,
    DeleteMany,
}

impl FluxEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FluxEvent::Create => "create",
            FluxEvent::Update => "update",
            FluxEvent::Delete => "delete",
            FluxEvent::DeleteMany => "deleteMany",
        }
    }
}

impl fmt::Display for FluxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who receives a delivery.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Nobody,
    /// Every known subscriber group.
    Everyone,
    Groups(Vec<String>),
}

impl From<bool> for Delivery {
    fn from(b: bool) -> Self {
        if b {
            Delivery::Everyone
        } else {
            Delivery::Nobody
        }
    }
}

impl<'de> Deserialize<'de> for Delivery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            One(String),
            Many(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(b) => b.into(),
            Raw::One(g) => Delivery::Groups(vec![g]),
            Raw::Many(g) if g.is_empty() => Delivery::Nobody,
            Raw::Many(g) => Delivery::Groups(g),
        })
    }
}

/// Delivery targets given as data in a declaration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FluxRules {
    pub access: BTreeMap<FluxEvent, Delivery>,
}

impl FluxRules {
    pub fn overlay(&mut self, other: &FluxRules) {
        for (e, d) in &other.access {
            self.access.insert(*e, d.clone());
        }
    }
}

/// What an access hook sees. `entry` is the persisted record, or `{deletedCount}` for `deleteMany`.
pub struct FluxContext<'a> {
    pub entity: &'a str,
    pub event: FluxEvent,
    pub entry: &'a Value,
}

/// What a payload hook sees: the same mutation, addressed to one group.
pub struct PayloadContext<'a> {
    pub group: &'a str,
    pub entity: &'a str,
    pub event: FluxEvent,
    pub entry: &'a Value,
}

pub type AccessFn = Arc<dyn Fn(&FluxContext<'_>) -> Delivery + Send + Sync>;
pub type PayloadFn = Arc<dyn Fn(&PayloadContext<'_>) -> Option<Value> + Send + Sync>;

/// Per-event hooks. An event without an access hook is not delivered; an event without a
/// payload hook delivers the entry as is.
#[derive(Clone, Default)]
pub struct FluxHooks {
    pub access: HashMap<FluxEvent, AccessFn>,
    pub payload: HashMap<FluxEvent, PayloadFn>,
}

impl FluxHooks {
    /// Turn data rules into hooks, keeping hooks already registered in code.
    pub fn absorb(&mut self, rules: &FluxRules) {
        for (event, delivery) in &rules.access {
            let delivery = delivery.clone();
            self.access
                .entry(*event)
                .or_insert_with(|| Arc::new(move |_: &FluxContext<'_>| delivery.clone()));
        }
    }

    pub fn overlay(&mut self, other: &FluxHooks) {
        for (e, f) in &other.access {
            self.access.insert(*e, f.clone());
        }
        for (e, f) in &other.payload {
            self.payload.insert(*e, f.clone());
        }
    }

    /// Resolve the groups and per-group payloads of one mutation.
    pub fn plan(&self, entity: &str, event: FluxEvent, entry: &Value, everyone: impl FnOnce() -> Vec<String>) -> Vec<(String, Value)> {
        let ctx = FluxContext { entity, event, entry };
        let delivery = match self.access.get(&event) {
            Some(f) => f(&ctx),
            None => Delivery::Nobody,
        };
        let groups = match delivery {
            Delivery::Nobody => return Vec::new(),
            Delivery::Everyone => everyone(),
            Delivery::Groups(groups) => groups,
        };
        groups
            .into_iter()
            .filter_map(|group| {
                let payload = match self.payload.get(&event) {
                    Some(f) => f(&PayloadContext {
                        group: &group,
                        entity,
                        event,
                        entry,
                    }),
                    None => Some(entry.clone()),
                };
                payload.filter(|p| !p.is_null()).map(|p| (group, p))
            })
            .collect()
    }
}

struct FluxRuntime {
    declarations: DeclarationMap,
    io: Option<Arc<RealtimeHandle>>,
}

/// Shared between the plugin and every observer it attached.
#[derive(Default)]
pub struct FluxState {
    runtime: RwLock<Option<FluxRuntime>>,
}

impl FluxState {
    fn install(&self, declarations: DeclarationMap, io: Option<Arc<RealtimeHandle>>) {
        if let Ok(mut guard) = self.runtime.write() {
            *guard = Some(FluxRuntime { declarations, io });
        }
    }

    /// Deliver one mutation. Returns the number of groups addressed.
    pub fn deliver(&self, entity: &str, event: FluxEvent, entry: Value) -> usize {
        if entry.get(NO_FLUX_FIELD).and_then(Value::as_bool).unwrap_or(false) {
            return 0;
        }
        let Ok(guard) = self.runtime.read() else {
            return 0;
        };
        let Some(rt) = guard.as_ref() else {
            tracing::warn!(entity, event = %event, "flux delivery before initialization");
            return 0;
        };
        let Some(decl) = rt.declarations.get(entity) else {
            return 0;
        };
        let Some(io) = rt.io.as_ref() else {
            tracing::warn!(entity, event = %event, "flux has no realtime transport");
            return 0;
        };
        let deliveries = decl.flux.plan(entity, event, &entry, || io.user_groups());
        for (group, payload) in &deliveries {
            io.emit(group, event.as_str(), json!({ "entry": payload, "entity": entity }));
        }
        tracing::debug!(entity, event = %event, groups = deliveries.len(), "flux delivered");
        deliveries.len()
    }
}

struct FluxObserver {
    state: Arc<FluxState>,
}

impl PersistObserver for FluxObserver {
    fn after_save(&self, entity: &str, record: &Record, was_new: bool) {
        let event = if was_new { FluxEvent::Create } else { FluxEvent::Update };
        self.state.deliver(entity, event, Value::Object(record.clone()));
    }

    fn after_remove(&self, entity: &str, record: &Record) {
        self.state.deliver(entity, FluxEvent::Delete, Value::Object(record.clone()));
    }

    fn after_delete_many(&self, entity: &str, removed: u64) {
        self.state.deliver(entity, FluxEvent::DeleteMany, json!({ "deletedCount": removed }));
    }
}

pub struct FluxPlugin {
    state: Arc<FluxState>,
}

impl FluxPlugin {
    pub fn new() -> Self {
        FluxPlugin {
            state: Arc::new(FluxState::default()),
        }
    }
}

impl Default for FluxPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for FluxPlugin {
    fn name(&self) -> &'static str {
        "flux"
    }

    async fn init(&self, api: &PluginApi, entities: &Initialized) -> Result<(), AppError> {
        let io = api.methods::<RealtimeHandle>("io");
        self.state.install(entities.declarations.clone(), io);
        Ok(())
    }

    fn schema_created(&self, schema: &mut SchemaDefinition, _declaration: &EntityDeclaration) {
        schema.observe(Arc::new(FluxObserver {
            state: self.state.clone(),
        }));
    }

    fn methods(&self) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        Some(self.state.clone())
    }
}
