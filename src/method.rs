//! HTTP verb + path shape -> CRUD operation.

use axum::http::Method as Verb;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The operations an entity endpoint can perform. Each variant has exactly one executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Read,
    Update,
    Delete,
    List,
    Push,
    Pull,
    Patch,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Create,
        Method::Read,
        Method::Update,
        Method::Delete,
        Method::List,
        Method::Push,
        Method::Pull,
        Method::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Delete => "delete",
            Method::List => "list",
            Method::Push => "push",
            Method::Pull => "pull",
            Method::Patch => "patch",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the operation for a request. `None` means the request falls through to the next handler.
///
/// PATCH ignores the id: the sub-path alone selects between `patch` and `update`.
pub fn resolve(verb: &Verb, has_id: bool, has_sub_path: bool) -> Option<Method> {
    match *verb {
        Verb::POST if !has_id && has_sub_path => Some(Method::Push),
        Verb::POST if !has_id => Some(Method::Create),
        Verb::POST if has_sub_path => Some(Method::Push),
        Verb::GET if has_id => Some(Method::Read),
        Verb::GET => Some(Method::List),
        Verb::PATCH if has_sub_path => Some(Method::Patch),
        Verb::PATCH => Some(Method::Update),
        Verb::DELETE if has_sub_path => Some(Method::Pull),
        Verb::DELETE => Some(Method::Delete),
        _ => None,
    }
}
