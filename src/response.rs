//! Standard response envelope.

use crate::error::{AppError, ErrorBody};
use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Success<T> {
    pub status_code: u16,
    pub data: T,
}

pub fn success<T: Serialize>(data: T) -> Success<T> {
    Success {
        status_code: StatusCode::OK.as_u16(),
        data,
    }
}

/// What the pipeline hands back to the HTTP layer: a status, extra headers and a JSON body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        ApiResponse {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: serde_json::to_value(success(data)).unwrap_or(Value::Null),
        }
    }

    pub fn error(err: &AppError) -> Self {
        let body: ErrorBody = err.body();
        ApiResponse {
            status: err.status(),
            headers: Vec::new(),
            body: serde_json::to_value(body).unwrap_or(Value::Null),
        }
    }

    pub fn not_implemented() -> Self {
        Self::error(&AppError::NotImplemented("Method not implemented".into()))
    }

    /// Raw body, used by plugins that short-circuit the pipeline with their own payload.
    pub fn raw(status: StatusCode, body: Value) -> Self {
        ApiResponse {
            status,
            headers: Vec::new(),
            body,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (k, v) in self.headers {
            headers.insert(k, v);
        }
        (self.status, headers, Json(self.body)).into_response()
    }
}
