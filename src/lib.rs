//! Schema-driven CRUD gateway: entities declared as data, served over HTTP with field-level
//! access control and real-time delivery of every mutation.

pub mod access;
pub mod case;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod method;
pub mod params;
pub mod plugin;
pub mod record;
pub mod registry;
pub mod response;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;

pub use access::{Always, AuthenticatedOnly, Grant, LevelOnly};
pub use config::{DeclarationSource, EntityDeclaration, GatewayConfig};
pub use context::{ApiContext, Principal};
pub use controller::{Controller, ControllerFn, ControllerInput};
pub use error::{AppError, ConfigError, RegistryError, StoreError};
pub use gateway::{Gateway, GatewayBuilder};
pub use method::Method;
pub use plugin::{BearerTokens, FluxEvent, Plugin, RealtimeHandle, Request};
pub use registry::{Initialized, Registry};
pub use response::ApiResponse;
pub use routes::{common_routes_with_ready, entity_routes};
pub use state::AppState;
pub use store::{DocumentStore, FieldDef, FieldType, MemoryStore, Model, PgStore};
