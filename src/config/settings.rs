//! Gateway settings. Every field has a default; `from_env` overrides from `GATEWAY_*` variables.

use crate::error::ConfigError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Mount point of the entity routes.
    pub prefix: String,
    /// Path (below `prefix`) serving the entity schemas.
    pub entities_uri: String,
    /// Directory of declaration files.
    pub entities_path: String,
    pub collection_list_limit: usize,
    pub collection_max_list_limit: usize,
    pub init_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub body_limit_bytes: usize,
    /// PostgreSQL schema holding the collections when the SQL store is used.
    pub store_schema: String,
    /// Per-plugin overrides, deep-merged over each plugin's default config.
    pub plugins: Map<String, Value>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            prefix: "/api".into(),
            entities_uri: "/entities".into(),
            entities_path: "api".into(),
            collection_list_limit: 100,
            collection_max_list_limit: 300,
            init_timeout_ms: 15_000,
            request_timeout_ms: 15_000,
            body_limit_bytes: 1024 * 1024,
            store_schema: "gateway".into(),
            plugins: Map::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut c = GatewayConfig::default();
        if let Some(v) = lookup("GATEWAY_PREFIX") {
            c.prefix = normalize_prefix(&v);
        }
        if let Some(v) = lookup("GATEWAY_ENTITIES_PATH") {
            c.entities_path = v;
        }
        if let Some(v) = lookup("GATEWAY_STORE_SCHEMA") {
            c.store_schema = v;
        }
        parse_into(&lookup, "GATEWAY_INIT_TIMEOUT_MS", &mut c.init_timeout_ms)?;
        parse_into(&lookup, "GATEWAY_REQUEST_TIMEOUT_MS", &mut c.request_timeout_ms)?;
        parse_into(&lookup, "GATEWAY_LIST_LIMIT", &mut c.collection_list_limit)?;
        parse_into(&lookup, "GATEWAY_MAX_LIST_LIMIT", &mut c.collection_max_list_limit)?;
        if c.collection_list_limit > c.collection_max_list_limit {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_LIST_LIMIT",
                value: format!("{} exceeds max {}", c.collection_list_limit, c.collection_max_list_limit),
            });
        }
        Ok(c)
    }

    /// Settings for one plugin: its defaults with the configured overrides deep-merged on top.
    pub fn plugin_config(&self, name: &str, defaults: Value) -> Value {
        let mut merged = defaults;
        if let Some(overrides) = self.plugins.get(name) {
            crate::record::deep_merge(&mut merged, overrides.clone());
        }
        merged
    }
}

fn parse_into<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw.clone() })?;
    }
    Ok(())
}

fn normalize_prefix(p: &str) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
