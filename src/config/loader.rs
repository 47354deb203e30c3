//! Load entity declarations from a directory of JSON files and from code.

use crate::case::to_kebab_case;
use crate::config::EntityDeclaration;
use crate::error::RegistryError;
use crate::record::deep_merge;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Where declarations come from. Files are read on every registry build, so a reset picks up
/// changes on disk.
#[derive(Clone, Debug)]
pub struct DeclarationSource {
    /// Directory of `*.json` declaration files, loaded in file-name order.
    pub dir: Option<PathBuf>,
    /// Declarations written in code, appended after the directory's.
    pub inline: Vec<EntityDeclaration>,
    /// Code hooks overlaid on the loaded declaration of the same name.
    pub attachments: Vec<EntityDeclaration>,
    /// Deep-merged beneath every file before it is parsed.
    pub template: Value,
}

impl Default for DeclarationSource {
    fn default() -> Self {
        DeclarationSource {
            dir: None,
            inline: Vec::new(),
            attachments: Vec::new(),
            template: default_template(),
        }
    }
}

pub fn default_template() -> Value {
    json!({
        "name": null,
        "extend": null,
        "discriminator": null,
        "model": { "fields": {}, "text_index": [] },
        "access": {},
        "flux": { "access": {} }
    })
}

impl DeclarationSource {
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        DeclarationSource {
            dir: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_declaration(mut self, d: EntityDeclaration) -> Self {
        self.inline.push(d);
        self
    }

    pub fn with_attachment(mut self, d: EntityDeclaration) -> Self {
        self.attachments.push(d);
        self
    }

    /// Every declaration, attachments overlaid and data rules normalized.
    pub async fn load(&self) -> Result<Vec<EntityDeclaration>, RegistryError> {
        let mut declarations = match &self.dir {
            Some(dir) => load_dir(dir, &self.template).await?,
            None => Vec::new(),
        };
        declarations.extend(self.inline.iter().cloned());

        for attachment in &self.attachments {
            let target = declarations
                .iter_mut()
                .find(|d| d.name == attachment.name)
                .ok_or_else(|| RegistryError::Load(format!("hooks attached to unknown entity '{}'", attachment.name)))?;
            target.overlay(attachment);
        }
        for d in &mut declarations {
            if d.name.is_empty() {
                return Err(RegistryError::Load("declaration without a name".into()));
            }
            d.normalize();
        }
        Ok(declarations)
    }
}

async fn load_dir(dir: &Path, template: &Value) -> Result<Vec<EntityDeclaration>, RegistryError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| RegistryError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RegistryError::Load(format!("{}: {}", dir.display(), e)))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    let mut declarations = Vec::with_capacity(files.len());
    for path in files {
        declarations.push(load_file(&path, template).await?);
    }
    tracing::info!(dir = %dir.display(), count = declarations.len(), "loaded entity declarations");
    Ok(declarations)
}

async fn load_file(path: &Path, template: &Value) -> Result<EntityDeclaration, RegistryError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| RegistryError::Load(format!("{}: {}", path.display(), e)))?;
    let parsed: Value =
        serde_json::from_slice(&raw).map_err(|e| RegistryError::Load(format!("{}: {}", path.display(), e)))?;
    parse_declaration(template, parsed, &file_stem_name(path))
        .map_err(|e| RegistryError::Load(format!("{}: {}", path.display(), e)))
}

/// `template` deep-merged with `file`; `name` defaults to `default_name`.
pub fn parse_declaration(template: &Value, file: Value, default_name: &str) -> Result<EntityDeclaration, serde_json::Error> {
    let mut merged = template.clone();
    deep_merge(&mut merged, file);
    if let Value::Object(m) = &mut merged {
        if m.get("name").map_or(true, Value::is_null) {
            m.insert("name".into(), Value::String(default_name.to_string()));
        }
        m.retain(|_, v| !v.is_null());
    }
    serde_json::from_value(merged)
}

fn file_stem_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(to_kebab_case)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    #[test]
    fn name_defaults_to_kebab_file_stem() {
        let d = parse_declaration(&default_template(), json!({ "access": { "list": false } }), "order-item").unwrap();
        assert_eq!(d.name, "order-item");
        assert!(d.access_rules.contains_key(&Method::List));
        assert!(d.extend.is_none());
    }

    #[test]
    fn explicit_name_wins() {
        let d = parse_declaration(&default_template(), json!({ "name": "client", "extend": "user" }), "x").unwrap();
        assert_eq!(d.name, "client");
        assert_eq!(d.extend.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn attachments_must_name_a_loaded_entity() {
        let source = DeclarationSource::default()
            .with_declaration(EntityDeclaration::new("user"))
            .with_attachment(EntityDeclaration::new("ghost"));
        assert!(matches!(source.load().await, Err(RegistryError::Load(_))));
    }

    #[tokio::test]
    async fn missing_directory_is_a_load_error() {
        let source = DeclarationSource::dir("/nonexistent/entities");
        assert!(matches!(source.load().await, Err(RegistryError::Load(_))));
    }
}
