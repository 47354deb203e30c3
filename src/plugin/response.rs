//! The response envelope. Always the last plugin.

use crate::error::AppError;
use crate::plugin::{Exchange, Flow, Plugin, PluginApi};
use crate::response::ApiResponse;
use async_trait::async_trait;

pub struct ResponsePlugin;

#[async_trait]
impl Plugin for ResponsePlugin {
    fn name(&self) -> &'static str {
        "response"
    }

    /// Wrap the result. A request nothing handled is 404 when its first segment names no
    /// entity, and 501 otherwise.
    async fn extend(&self, ex: &mut Exchange, _api: &PluginApi) -> Result<Flow, AppError> {
        if ex.response.is_some() {
            return Ok(Flow::Next);
        }
        let response = match ex.result.take() {
            Some(data) => ApiResponse::ok(data),
            None => match ex.request.segments().first() {
                Some(seg) if ex.entities.model(seg).is_none() => {
                    return Err(AppError::NotFound(format!("entity {}", seg)));
                }
                _ => ApiResponse::not_implemented(),
            },
        };
        ex.response = Some(response);
        Ok(Flow::Next)
    }
}
