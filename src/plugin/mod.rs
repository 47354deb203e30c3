//! Plugin pipeline. Every request runs the `prepare` step of each plugin in registration order,
//! then every `extend` step in the same order. Plugins also receive the registry's build-time
//! events and may expose methods to each other by name.

pub mod auth;
pub mod context;
pub mod flux;
pub mod io;
pub mod response;
pub mod router;
pub mod schemas;

pub use auth::{Anonymous, AuthPlugin, Authenticator, BearerTokens};
pub use context::ContextPlugin;
pub use flux::{Delivery, FluxEvent, FluxPlugin, FluxState};
pub use io::{BroadcastHub, Envelope, IoPlugin, RealtimeHandle, RealtimeTransport, Subscription};
pub use response::ResponsePlugin;
pub use router::{CrudRouter, PermissionsHandle};
pub use schemas::SchemasPlugin;

use crate::access::Grant;
use crate::config::{EntityDeclaration, GatewayConfig};
use crate::context::{ApiContext, Principal};
use crate::error::{AppError, RegistryError};
use crate::registry::{Initialized, LifecycleListener, Registry};
use crate::response::ApiResponse;
use crate::store::{Model, SchemaDefinition};
use async_trait::async_trait;
use axum::http::{HeaderMap, Method as Verb};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The HTTP request as the pipeline sees it. `path` is relative to the gateway prefix.
#[derive(Clone, Debug)]
pub struct Request {
    pub verb: Verb,
    pub path: String,
    /// Parsed and coerced query string.
    pub query: Value,
    pub headers: HeaderMap,
    /// `Null` when the request had no body.
    pub body: Value,
}

impl Request {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Request {
            verb,
            path: path.into(),
            query: json!({}),
            headers: HeaderMap::new(),
            body: Value::Null,
        }
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Per-request state threaded through every plugin step.
pub struct Exchange {
    pub request: Request,
    pub entities: Arc<Initialized>,
    pub user: Option<Principal>,
    /// Set once the router resolved an entity method.
    pub context: Option<ApiContext>,
    /// Grant returned by the method's access hook.
    pub grant: Option<Grant>,
    /// Result data to be wrapped by the response plugin.
    pub result: Option<Value>,
    /// A finished response; later steps leave it alone.
    pub response: Option<ApiResponse>,
    pub started: Instant,
}

impl Exchange {
    pub fn new(request: Request, entities: Arc<Initialized>) -> Self {
        Exchange {
            request,
            entities,
            user: None,
            context: None,
            grant: None,
            result: None,
            response: None,
            started: Instant::now(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_some() || self.response.is_some()
    }
}

/// Whether the pipeline continues after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// The exchange carries its final response: skip every remaining step.
    Halt,
}

/// A pipeline plugin. Every capability is optional.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_config(&self) -> Value {
        json!({})
    }

    /// Once per registry generation, after every model is built.
    async fn init(&self, _api: &PluginApi, _entities: &Initialized) -> Result<(), AppError> {
        Ok(())
    }

    /// Once per entity as it is built.
    fn schema_created(&self, _schema: &mut SchemaDefinition, _declaration: &EntityDeclaration) {}

    fn model_created(&self, _model: &Model, _declaration: &EntityDeclaration) {}

    async fn prepare(&self, _ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        Ok(Flow::Next)
    }

    async fn extend(&self, _ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        Ok(Flow::Next)
    }

    /// Turn a failed step into a response. The first plugin returning one wins.
    fn recover(&self, _err: &AppError) -> Option<ApiResponse> {
        None
    }

    /// Last touch on every response, run in reverse registration order.
    fn finish(&self, _started: Instant, _response: &mut ApiResponse) {}

    /// Methods other plugins reach through [`PluginApi::methods`].
    fn methods(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// What plugins see of each other and of the gateway settings.
pub struct PluginApi {
    config: Arc<GatewayConfig>,
    configs: HashMap<&'static str, Value>,
    methods: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl PluginApi {
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// A plugin's effective settings: defaults with configured overrides merged on top.
    pub fn plugin_config(&self, plugin: &str) -> Option<&Value> {
        self.configs.get(plugin)
    }

    /// The methods a plugin exposed, if it is registered and exposes a `T`.
    pub fn methods<T: Any + Send + Sync>(&self, plugin: &str) -> Option<Arc<T>> {
        self.methods.get(plugin).cloned().and_then(|m| m.downcast::<T>().ok())
    }
}

pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
    api: PluginApi,
}

impl Pipeline {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>, config: Arc<GatewayConfig>) -> Self {
        let mut configs = HashMap::new();
        let mut methods = HashMap::new();
        for p in &plugins {
            configs.insert(p.name(), config.plugin_config(p.name(), p.default_config()));
            if let Some(m) = p.methods() {
                methods.insert(p.name(), m);
            }
        }
        Pipeline {
            plugins,
            api: PluginApi { config, configs, methods },
        }
    }

    pub fn api(&self) -> &PluginApi {
        &self.api
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run one request: wait for the registry, then every step, then the finishers.
    pub async fn handle(&self, registry: &Registry, request: Request) -> ApiResponse {
        let started = Instant::now();
        let mut response = match registry.initialize().await {
            Ok(entities) => {
                let mut ex = Exchange::new(request, entities);
                ex.started = started;
                self.run(&mut ex).await
            }
            Err(err) => self.recover(&err),
        };
        self.finish(started, &mut response);
        response
    }

    /// A request refused before its steps could run, recovered and finished like any other.
    pub fn reject(&self, started: Instant, err: &AppError) -> ApiResponse {
        let mut response = self.recover(err);
        self.finish(started, &mut response);
        response
    }

    fn finish(&self, started: Instant, response: &mut ApiResponse) {
        for p in self.plugins.iter().rev() {
            p.finish(started, response);
        }
    }

    async fn run(&self, ex: &mut Exchange) -> ApiResponse {
        let limit = self.api.config.request_timeout_ms;
        let outcome = match tokio::time::timeout(Duration::from_millis(limit), self.steps(ex)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::RequestTimeout(limit)),
        };
        match outcome {
            Ok(()) => ex.response.take().unwrap_or_else(ApiResponse::not_implemented),
            Err(err) => self.recover(&err),
        }
    }

    async fn steps(&self, ex: &mut Exchange) -> Result<(), AppError> {
        for p in &self.plugins {
            if p.prepare(ex, &self.api).await? == Flow::Halt {
                return Ok(());
            }
        }
        for p in &self.plugins {
            if p.extend(ex, &self.api).await? == Flow::Halt {
                return Ok(());
            }
        }
        Ok(())
    }

    fn recover(&self, err: &AppError) -> ApiResponse {
        self.plugins
            .iter()
            .find_map(|p| p.recover(err))
            .unwrap_or_else(|| ApiResponse::error(err))
    }
}

#[async_trait]
impl LifecycleListener for Pipeline {
    fn schema_created(&self, schema: &mut SchemaDefinition, declaration: &EntityDeclaration) {
        for p in &self.plugins {
            p.schema_created(schema, declaration);
        }
    }

    fn model_created(&self, model: &Model, declaration: &EntityDeclaration) {
        for p in &self.plugins {
            p.model_created(model, declaration);
        }
    }

    async fn entity_map_ready(&self, entities: &Initialized) -> Result<(), RegistryError> {
        for p in &self.plugins {
            p.init(&self.api, entities).await.map_err(|e| RegistryError::PluginInit {
                plugin: p.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// The standard plugin set in its fixed order; `extra` plugins run just before `response`.
pub fn default_plugins(
    auth: AuthPlugin,
    schemas: SchemasPlugin,
    transport: Arc<dyn RealtimeTransport>,
    extra: Vec<Arc<dyn Plugin>>,
) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(ContextPlugin),
        Arc::new(auth),
        Arc::new(schemas),
        Arc::new(IoPlugin::new(transport)),
        Arc::new(FluxPlugin::new()),
        Arc::new(CrudRouter::new()),
    ];
    plugins.extend(extra);
    plugins.push(Arc::new(ResponsePlugin));
    plugins
}
