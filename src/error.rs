//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Startup failures: the entity graph could not be turned into models. Fatal, never partial.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("infinite iteration: no buildable order for {0:?} (cyclic dependency)")]
    CyclicDependency(Vec<String>),
    #[error("entity '{entity}' depends on unknown entity '{target}'")]
    MissingDependency { entity: String, target: String },
    #[error("entity '{0}' declares both extend and discriminator")]
    ConflictingInheritance(String),
    #[error("duplicate entity name: {0}")]
    DuplicateEntity(String),
    #[error("declaration load: {0}")]
    Load(String),
    #[error("registry build is in flight")]
    Busy,
    #[error("plugin {plugin} failed to initialize: {message}")]
    PluginInit { plugin: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("encode: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("entity registry did not initialize within {0} ms")]
    InitializationTimeout(u64),
    #[error("request did not complete within {0} ms")]
    RequestTimeout(u64),
    #[error("{0}")]
    NotImplemented(String),
    #[error(transparent)]
    Registry(Arc<RegistryError>),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Registry(Arc::new(e))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey(key) => AppError::Validation(format!("duplicate value for unique field {}", key)),
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InitializationTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Registry(_) | AppError::Store(_) | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        let status = self.status();
        ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
        }
    }
}

/// Structured failure payload: `{statusCode, error, message}`.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_forbidden_payload() {
        let body = AppError::AccessDenied("Access to level were not granted.".into()).body();
        assert_eq!(body.status_code, 403);
        assert_eq!(body.error, "Forbidden");
        assert_eq!(body.message, "Access to level were not granted.");
    }

    #[test]
    fn duplicate_key_surfaces_as_validation() {
        let err: AppError = StoreError::DuplicateKey("email".into()).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
