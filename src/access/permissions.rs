//! Permission engine: per entity, a complete method -> hook table.

use crate::access::hooks::{hook, Always, AuthenticatedOnly, Hook};
use crate::access::Grant;
use crate::config::DeclarationMap;
use crate::context::ApiContext;
use crate::error::AppError;
use crate::method::Method;
use std::collections::HashMap;

#[derive(Clone)]
pub struct EntityPermissions {
    hooks: HashMap<Method, Hook>,
}

impl EntityPermissions {
    /// Defaults overlaid with the declaration's own hooks. `patch` falls back to `update`.
    pub fn resolve(declared: &HashMap<Method, Hook>) -> Self {
        let mut hooks: HashMap<Method, Hook> = HashMap::new();
        for m in Method::ALL {
            let default = match m {
                Method::Read | Method::List => hook(Always),
                Method::Patch => continue,
                _ => hook(AuthenticatedOnly),
            };
            hooks.insert(m, default);
        }
        for (m, h) in declared {
            hooks.insert(*m, h.clone());
        }
        if !declared.contains_key(&Method::Patch) {
            if let Some(update) = hooks.get(&Method::Update).cloned() {
                hooks.insert(Method::Patch, update);
            }
        }
        EntityPermissions { hooks }
    }

    pub fn hook(&self, method: Method) -> Option<&Hook> {
        self.hooks.get(&method)
    }

    /// Evaluate the hook for `method`; a missing hook denies.
    pub async fn evaluate(&self, method: Method, ctx: &mut ApiContext) -> Result<Grant, AppError> {
        match self.hooks.get(&method) {
            Some(h) => h.grant(ctx).await,
            None => Ok(Grant::Denied),
        }
    }
}

/// Entity name -> permissions. Built once per registry generation.
#[derive(Clone, Default)]
pub struct PermissionMap {
    by_entity: HashMap<String, EntityPermissions>,
}

impl PermissionMap {
    pub fn get(&self, entity: &str) -> Option<&EntityPermissions> {
        self.by_entity.get(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.by_entity.keys().map(String::as_str)
    }
}

pub fn get_permissions(declarations: &DeclarationMap) -> PermissionMap {
    let by_entity = declarations
        .iter()
        .map(|d| (d.name.clone(), EntityPermissions::resolve(&d.access)))
        .collect();
    PermissionMap { by_entity }
}
