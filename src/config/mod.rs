//! Entity declarations: types, loading, dependency ordering and gateway settings.

pub mod loader;
pub mod resolved;
pub mod settings;
pub mod types;
pub mod validator;

pub use loader::{default_template, parse_declaration, DeclarationSource};
pub use resolved::DeclarationMap;
pub use settings::GatewayConfig;
pub use types::*;
pub use validator::{build_order, dependency_of, Dependency};
