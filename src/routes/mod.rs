//! Route tables.

pub mod common;
pub mod entity;

pub use common::common_routes_with_ready;
pub use entity::entity_routes;
