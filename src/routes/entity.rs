//! Entity routes: everything under the prefix goes to the pipeline, which resolves entity,
//! id, controller and sub-path itself.

use crate::handlers::entity::dispatch;
use crate::state::AppState;
use axum::{routing::any, Router};

pub fn entity_routes(state: AppState, prefix: &str) -> Router {
    let root = if prefix.is_empty() { "/".to_string() } else { prefix.to_string() };
    Router::new()
        .route(&root, any(dispatch))
        .route(&format!("{}/*path", prefix), any(dispatch))
        .with_state(state)
}
