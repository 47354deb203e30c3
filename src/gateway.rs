//! The assembled gateway: registry, plugin pipeline and the axum router in front of them.

use crate::config::{DeclarationSource, EntityDeclaration, GatewayConfig};
use crate::context::Principal;
use crate::plugin::{
    default_plugins, Anonymous, AuthPlugin, Authenticator, BroadcastHub, Pipeline, Plugin, RealtimeHandle,
    RealtimeTransport, Request, SchemasPlugin,
};
use crate::registry::Registry;
use crate::response::ApiResponse;
use crate::routes::{common_routes_with_ready, entity_routes};
use crate::state::AppState;
use crate::store::{DocumentStore, MemoryStore};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub struct Gateway {
    registry: Registry,
    pipeline: Arc<Pipeline>,
    config: Arc<GatewayConfig>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The real-time handle of the `io` plugin, used to open subscriptions.
    pub fn io(&self) -> Option<Arc<RealtimeHandle>> {
        self.pipeline.api().methods::<RealtimeHandle>("io")
    }

    /// Run one request through the pipeline without going through HTTP.
    pub async fn handle(&self, request: Request) -> ApiResponse {
        self.pipeline.handle(&self.registry, request).await
    }

    /// Health routes at the root and the entity routes under `prefix`.
    pub fn router(self: &Arc<Self>) -> Router {
        let state = AppState { gateway: self.clone() };
        common_routes_with_ready(state.clone())
            .merge(entity_routes(state, &self.config.prefix))
            .layer(RequestBodyLimitLayer::new(self.config.body_limit_bytes))
            .layer(TraceLayer::new_for_http())
    }
}

pub struct GatewayBuilder {
    config: GatewayConfig,
    source: DeclarationSource,
    store: Option<Arc<dyn DocumentStore>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    auth_entity: Option<String>,
    schemas: Option<SchemasPlugin>,
    transport: Option<Arc<dyn RealtimeTransport>>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        GatewayBuilder {
            config: GatewayConfig::default(),
            source: DeclarationSource::default(),
            store: None,
            authenticator: None,
            auth_entity: None,
            schemas: None,
            transport: None,
            plugins: Vec::new(),
        }
    }
}

impl GatewayBuilder {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Load `*.json` declarations from this directory on every registry build.
    pub fn entities_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source.dir = Some(dir.into());
        self
    }

    pub fn entity(mut self, declaration: EntityDeclaration) -> Self {
        self.source = self.source.with_declaration(declaration);
        self
    }

    /// Code hooks for an entity declared on disk.
    pub fn attach(mut self, hooks: EntityDeclaration) -> Self {
        self.source = self.source.with_attachment(hooks);
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// The entity whose saves are pushed to the saved user as `profile-update` (default `user`).
    pub fn auth_entity(mut self, entity: impl Into<String>) -> Self {
        self.auth_entity = Some(entity.into());
        self
    }

    /// Decide per caller and entity whether the schema endpoint lists it.
    pub fn schema_access<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&Principal>, &str) -> bool + Send + Sync + 'static,
    {
        self.schemas = Some(SchemasPlugin::with_access(f));
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registered after the standard plugins, before `response`.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(self) -> Arc<Gateway> {
        let config = Arc::new(self.config);
        let mut auth = AuthPlugin::new(self.authenticator.unwrap_or_else(|| Arc::new(Anonymous) as Arc<dyn Authenticator>));
        if let Some(entity) = self.auth_entity {
            auth = auth.with_auth_entity(entity);
        }
        let plugins = default_plugins(
            auth,
            self.schemas.unwrap_or_default(),
            self.transport.unwrap_or_else(|| Arc::new(BroadcastHub::new(256)) as Arc<dyn RealtimeTransport>),
            self.plugins,
        );
        let pipeline = Arc::new(Pipeline::new(plugins, config.clone()));
        tracing::debug!(plugins = ?pipeline.plugin_names(), "plugin pipeline assembled");
        let registry = Registry::new(
            self.source,
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>),
            pipeline.clone(),
            Duration::from_millis(config.init_timeout_ms),
        );
        Arc::new(Gateway {
            registry,
            pipeline,
            config,
        })
    }
}
