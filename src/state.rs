//! Shared application state for all routes.

use crate::gateway::Gateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Registry and pipeline; the registry rebuilds lazily after a reset.
    pub gateway: Arc<Gateway>,
}
