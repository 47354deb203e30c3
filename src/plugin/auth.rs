//! Authentication: resolves the caller and keeps connected clients' profiles fresh.

use crate::config::EntityDeclaration;
use crate::context::Principal;
use crate::error::AppError;
use crate::plugin::io::RealtimeHandle;
use crate::plugin::{Exchange, Flow, Plugin, PluginApi};
use crate::record::{record_id, Record};
use crate::registry::Initialized;
use crate::store::{PersistObserver, SchemaDefinition};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub const PROFILE_UPDATE_EVENT: &str = "profile-update";

/// Resolves request headers to a principal. `Ok(None)` is an anonymous caller; credentials
/// that are present but invalid are an error.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AppError>;
}

/// Everyone is anonymous.
pub struct Anonymous;

#[async_trait]
impl Authenticator for Anonymous {
    async fn authenticate(&self, _headers: &HeaderMap) -> Result<Option<Principal>, AppError> {
        Ok(None)
    }
}

/// Static `Authorization: Bearer <token>` table.
#[derive(Clone, Default)]
pub struct BearerTokens {
    tokens: HashMap<String, Principal>,
}

impl BearerTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl Authenticator for BearerTokens {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>, AppError> {
        let Some(raw) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let token = raw
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::BadRequest("malformed authorization header".into()))?;
        self.tokens
            .get(token)
            .cloned()
            .map(Some)
            .ok_or_else(|| AppError::AccessDenied("invalid session".into()))
    }
}

type IoSlot = Arc<RwLock<Option<Arc<RealtimeHandle>>>>;

/// Pushes the saved profile to the user's private group.
struct ProfileObserver {
    io: IoSlot,
}

impl PersistObserver for ProfileObserver {
    fn after_save(&self, _entity: &str, record: &Record, was_new: bool) {
        if was_new {
            return;
        }
        let Some(id) = record_id(record) else {
            return;
        };
        if let Ok(guard) = self.io.read() {
            if let Some(io) = guard.as_ref() {
                io.notify(id, PROFILE_UPDATE_EVENT, Value::Object(record.clone()));
            }
        }
    }
}

pub struct AuthPlugin {
    authenticator: Arc<dyn Authenticator>,
    auth_entity: String,
    io: IoSlot,
}

impl AuthPlugin {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        AuthPlugin {
            authenticator,
            auth_entity: "user".into(),
            io: Arc::new(RwLock::new(None)),
        }
    }

    /// The entity holding user profiles (default `user`).
    pub fn with_auth_entity(mut self, entity: impl Into<String>) -> Self {
        self.auth_entity = entity.into();
        self
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn default_config(&self) -> Value {
        json!({ "authEntity": self.auth_entity })
    }

    async fn init(&self, api: &PluginApi, _entities: &Initialized) -> Result<(), AppError> {
        if let Ok(mut slot) = self.io.write() {
            *slot = api.methods::<RealtimeHandle>("io");
        }
        Ok(())
    }

    fn schema_created(&self, schema: &mut SchemaDefinition, declaration: &EntityDeclaration) {
        if declaration.name == self.auth_entity {
            schema.observe(Arc::new(ProfileObserver { io: self.io.clone() }));
        }
    }

    async fn prepare(&self, ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        ex.user = self.authenticator.authenticate(&ex.request.headers).await?;
        Ok(Flow::Next)
    }
}
