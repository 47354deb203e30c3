//! Field-level access control: grants, hooks, the permission map and result filtering.

pub mod filter;
mod grant;
pub mod hooks;
pub mod permissions;

pub use filter::{changed_paths, ensure_granted, filter_access, granted_view, not_granted};
pub use grant::Grant;
pub use hooks::{hook, AccessHook, Always, AuthenticatedOnly, Hook, LevelOnly};
pub use permissions::{get_permissions, EntityPermissions, PermissionMap};
