//! HTTP handlers: every entity request goes through the plugin pipeline.

pub mod entity;
pub use entity::*;
