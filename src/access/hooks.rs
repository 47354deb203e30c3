//! Access hooks: functions of the request context returning a [`Grant`].

use crate::access::Grant;
use crate::context::ApiContext;
use crate::error::AppError;
use async_trait::async_trait;
use std::sync::Arc;

/// Evaluated once per request for the resolved method, and once per result record for `read`.
///
/// Plain closures `Fn(&mut ApiContext) -> Grant` are hooks; hooks that need I/O (such as
/// looking at the existing entry) implement the trait directly.
#[async_trait]
pub trait AccessHook: Send + Sync {
    async fn grant(&self, ctx: &mut ApiContext) -> Result<Grant, AppError>;
}

pub type Hook = Arc<dyn AccessHook>;

#[async_trait]
impl<F> AccessHook for F
where
    F: Fn(&mut ApiContext) -> Grant + Send + Sync,
{
    async fn grant(&self, ctx: &mut ApiContext) -> Result<Grant, AppError> {
        Ok(self(ctx))
    }
}

/// A grant given as data.
#[async_trait]
impl AccessHook for Grant {
    async fn grant(&self, _ctx: &mut ApiContext) -> Result<Grant, AppError> {
        Ok(self.clone())
    }
}

/// Default for mutations: any authenticated caller.
pub struct AuthenticatedOnly;

#[async_trait]
impl AccessHook for AuthenticatedOnly {
    async fn grant(&self, ctx: &mut ApiContext) -> Result<Grant, AppError> {
        Ok(ctx.user().is_some().into())
    }
}

/// Default for `read` and `list`.
pub struct Always;

#[async_trait]
impl AccessHook for Always {
    async fn grant(&self, _ctx: &mut ApiContext) -> Result<Grant, AppError> {
        Ok(Grant::Unrestricted)
    }
}

/// Grants `grant` only to callers of the given level.
pub struct LevelOnly {
    pub level: String,
    pub grant: Grant,
}

impl LevelOnly {
    pub fn new(level: impl Into<String>) -> Self {
        LevelOnly {
            level: level.into(),
            grant: Grant::Unrestricted,
        }
    }
}

#[async_trait]
impl AccessHook for LevelOnly {
    async fn grant(&self, ctx: &mut ApiContext) -> Result<Grant, AppError> {
        Ok(match ctx.user() {
            Some(u) if u.has_level(&self.level) => self.grant.clone(),
            _ => Grant::Denied,
        })
    }
}

pub fn hook<H: AccessHook + 'static>(h: H) -> Hook {
    Arc::new(h)
}
