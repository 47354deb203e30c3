//! Entity controllers: named methods reachable at `/:entity/:method-name`.

use crate::context::Principal;
use crate::error::AppError;
use crate::store::Model;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// What a controller method receives: coerced query params, the request body and the caller.
#[derive(Clone, Debug)]
pub struct ControllerInput {
    pub params: Value,
    pub body: Value,
    pub user: Option<Principal>,
}

#[async_trait]
pub trait Controller: Send + Sync {
    async fn call(&self, model: Arc<Model>, input: ControllerInput) -> Result<Value, AppError>;
}

/// Adapts an async function into a [`Controller`].
pub struct ControllerFn<F>(pub F);

#[async_trait]
impl<F, Fut> Controller for ControllerFn<F>
where
    F: Fn(Arc<Model>, ControllerInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, AppError>> + Send,
{
    async fn call(&self, model: Arc<Model>, input: ControllerInput) -> Result<Value, AppError> {
        (self.0)(model, input).await
    }
}
