//! The result of an access hook.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// `true` (unrestricted), `false` (denied) or an allowlist of field paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grant {
    Unrestricted,
    Denied,
    Fields(BTreeSet<String>),
}

impl Grant {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Grant::Fields(fields.into_iter().map(Into::into).collect())
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Grant::Denied)
    }

    /// Whether writing or reading `path` stays inside the grant. A listed field covers its
    /// sub-paths, and a listed sub-path covers the parents on the way to it only for itself.
    pub fn covers(&self, path: &str) -> bool {
        match self {
            Grant::Unrestricted => true,
            Grant::Denied => false,
            Grant::Fields(set) => set.iter().any(|f| {
                f == path
                    || path
                        .strip_prefix(f.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
        }
    }

    /// A field grant that also lists `path`. Unrestricted and denied grants are unchanged.
    pub fn with_field(&self, path: &str) -> Grant {
        match self {
            Grant::Fields(set) => {
                let mut set = set.clone();
                set.insert(path.to_string());
                Grant::Fields(set)
            }
            g => g.clone(),
        }
    }

    /// The narrower of two grants.
    pub fn intersect(&self, other: &Grant) -> Grant {
        match (self, other) {
            (Grant::Denied, _) | (_, Grant::Denied) => Grant::Denied,
            (Grant::Unrestricted, g) | (g, Grant::Unrestricted) => g.clone(),
            (Grant::Fields(a), Grant::Fields(_)) => {
                Grant::Fields(a.iter().filter(|f| other.covers(f)).cloned().collect())
            }
        }
    }
}

impl From<bool> for Grant {
    fn from(b: bool) -> Self {
        if b {
            Grant::Unrestricted
        } else {
            Grant::Denied
        }
    }
}

impl From<Vec<&str>> for Grant {
    fn from(v: Vec<&str>) -> Self {
        Grant::fields(v)
    }
}

impl From<Vec<String>> for Grant {
    fn from(v: Vec<String>) -> Self {
        Grant::fields(v)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GrantRepr {
    Flag(bool),
    Fields(Vec<String>),
}

impl<'de> Deserialize<'de> for Grant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match GrantRepr::deserialize(deserializer)? {
            GrantRepr::Flag(b) => b.into(),
            GrantRepr::Fields(f) => f.into(),
        })
    }
}

impl Serialize for Grant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Grant::Unrestricted => GrantRepr::Flag(true).serialize(serializer),
            Grant::Denied => GrantRepr::Flag(false).serialize(serializer),
            Grant::Fields(f) => GrantRepr::Fields(f.iter().cloned().collect()).serialize(serializer),
        }
    }
}
