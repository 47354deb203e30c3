//! The CRUD router: `/:entity[/:id|:controller][/:sub.path]`.
//!
//! Prepare resolves the entity, the method and its grant (or runs a controller); extend executes
//! the method and filters what it returns.

use crate::access::{Grant, PermissionMap};
use crate::case::to_camel_case;
use crate::context::ApiContext;
use crate::controller::ControllerInput;
use crate::error::AppError;
use crate::method::resolve;
use crate::plugin::{Exchange, Flow, Plugin, PluginApi};
use crate::record::is_valid_id;
use crate::registry::Initialized;
use crate::service::crud::{denied, CrudExecutor};
use async_trait::async_trait;
use std::any::Any;
use std::sync::{Arc, RwLock};

/// What the segment after the entity name addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    None,
    Id(String),
    Ids(Vec<String>),
    Controller(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub entity: String,
    pub target: Target,
    /// Remaining segments joined with `.`.
    pub sub_path: Option<String>,
}

/// Split path segments into entity, target and dotted sub-path.
pub fn parse_route(segments: &[&str]) -> Option<Route> {
    let (entity, rest) = segments.split_first()?;
    let target = match rest.first() {
        None => Target::None,
        Some(seg) if is_valid_id(seg) => Target::Id(seg.to_string()),
        Some(seg) if seg.contains(',') && seg.split(',').all(is_valid_id) => {
            Target::Ids(seg.split(',').map(str::to_string).collect())
        }
        Some(seg) => Target::Controller(seg.to_string()),
    };
    let sub_path = rest.get(1..).filter(|s| !s.is_empty()).map(|s| s.join("."));
    Some(Route {
        entity: entity.to_string(),
        target,
        sub_path,
    })
}

/// The router's methods: the permission map of the current registry generation.
#[derive(Default)]
pub struct PermissionsHandle {
    current: RwLock<Option<PermissionMap>>,
}

impl PermissionsHandle {
    pub fn permissions(&self) -> Option<PermissionMap> {
        self.current.read().ok().and_then(|p| p.clone())
    }
}

pub struct CrudRouter {
    handle: Arc<PermissionsHandle>,
}

impl CrudRouter {
    pub fn new() -> Self {
        CrudRouter {
            handle: Arc::new(PermissionsHandle::default()),
        }
    }
}

impl Default for CrudRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CrudRouter {
    fn name(&self) -> &'static str {
        "crud-router"
    }

    async fn init(&self, _api: &PluginApi, entities: &Initialized) -> Result<(), AppError> {
        if let Ok(mut slot) = self.handle.current.write() {
            *slot = Some(entities.permissions.clone());
        }
        Ok(())
    }

    async fn prepare(&self, ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        if ex.is_settled() {
            return Ok(Flow::Next);
        }
        let Some(route) = parse_route(&ex.request.segments()) else {
            return Ok(Flow::Next);
        };
        let entities = ex.entities.clone();
        // Not an entity: a later plugin may serve the path.
        let Some(model) = entities.model(&route.entity).cloned() else {
            return Ok(Flow::Next);
        };

        let (id, ids) = match route.target {
            Target::None => (None, Vec::new()),
            Target::Id(id) => (Some(id), Vec::new()),
            Target::Ids(ids) => (None, ids),
            Target::Controller(name) => {
                let controller = entities
                    .declaration(&route.entity)
                    .and_then(|d| d.controller.get(&to_camel_case(&name)).cloned())
                    .ok_or_else(|| AppError::BadRequest("Invalid entity id or controller".into()))?;
                tracing::debug!(entity = %route.entity, controller = %name, "controller call");
                let input = ControllerInput {
                    params: ex.request.query.clone(),
                    body: ex.request.body.clone(),
                    user: ex.user.clone(),
                };
                ex.result = Some(controller.call(model, input).await?);
                return Ok(Flow::Next);
            }
        };

        let has_id = id.is_some() || !ids.is_empty();
        let Some(method) = resolve(&ex.request.verb, has_id, route.sub_path.is_some()) else {
            return Ok(Flow::Next);
        };

        let mut ctx = ApiContext::new(model, method)
            .with_user(ex.user.clone())
            .with_id(id)
            .with_ids(ids)
            .with_entry_path(route.sub_path)
            .with_params(ex.request.query.clone())
            .with_new_entry(ex.request.body.clone());
        let permissions = entities
            .permissions
            .get(&route.entity)
            .ok_or_else(|| AppError::NotFound(format!("entity {}", route.entity)))?;
        let grant = permissions.evaluate(method, &mut ctx).await?;
        tracing::debug!(entity = %route.entity, method = %method, grant = ?grant, "resolved");
        if grant == Grant::Denied {
            return Err(denied(&ctx));
        }
        ex.context = Some(ctx);
        ex.grant = Some(grant);
        Ok(Flow::Next)
    }

    async fn extend(&self, ex: &mut Exchange, api: &PluginApi) -> Result<Flow, AppError> {
        if ex.is_settled() {
            return Ok(Flow::Next);
        }
        let result = match (&ex.context, &ex.grant) {
            (Some(ctx), Some(grant)) => {
                let permissions = ex
                    .entities
                    .permissions
                    .get(ctx.entity())
                    .ok_or_else(|| AppError::NotFound(format!("entity {}", ctx.entity())))?;
                CrudExecutor::new(permissions, api.config()).execute(ctx, grant).await?
            }
            _ => return Ok(Flow::Next),
        };
        ex.result = Some(result);
        Ok(Flow::Next)
    }

    fn methods(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(self.handle.clone())
    }
}
