//! The single entity handler. Translates the HTTP request into a pipeline [`Request`].

use crate::error::AppError;
use crate::params::parse_query;
use crate::plugin::Request;
use crate::response::ApiResponse;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
};
use serde_json::Value;
use std::time::Instant;

fn parse_body(bytes: &[u8]) -> Result<Value, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// Path below the gateway prefix, always starting with `/`.
fn relative_path<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

pub async fn dispatch(
    State(state): State<AppState>,
    verb: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse {
    let started = Instant::now();
    let gateway = &state.gateway;
    let mut request = Request::new(verb, relative_path(uri.path(), &gateway.config().prefix));
    request.query = parse_query(uri.query().unwrap_or(""));
    request.headers = headers;
    request.body = match parse_body(&body) {
        Ok(body) => body,
        Err(err) => return gateway.pipeline().reject(started, &err),
    };
    gateway.handle(request).await
}
