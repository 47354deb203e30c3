//! Request scope: structured error payloads and the standard response headers.

use crate::error::AppError;
use crate::plugin::Plugin;
use crate::response::ApiResponse;
use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue};
use std::time::Instant;

pub struct ContextPlugin;

#[async_trait]
impl Plugin for ContextPlugin {
    fn name(&self) -> &'static str {
        "context"
    }

    fn recover(&self, err: &AppError) -> Option<ApiResponse> {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %err, status = status.as_u16(), "request rejected");
        }
        Some(ApiResponse::error(err))
    }

    fn finish(&self, started: Instant, response: &mut ApiResponse) {
        let elapsed = started.elapsed().as_millis();
        response.headers.extend([
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
            (HeaderName::from_static("x-robots-tag"), HeaderValue::from_static("noindex, nofollow")),
        ]);
        if let Ok(v) = HeaderValue::from_str(&format!("{}ms", elapsed)) {
            response.headers.push((HeaderName::from_static("x-response-time"), v));
        }
    }
}
