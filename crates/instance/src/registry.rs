//! Tenant discovery and loading.
//!
//! A directory under the registry root is a tenant iff it carries both a
//! `config.json` and a `builder.json`.  Loading materializes the system
//! prompt from the builder's layered fragments and hashes it; the hash
//! uniquely identifies the prompt for a given on-disk state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::builder::{FragmentSource, PromptBuilder};
use crate::config::TenantConfig;

pub const CONFIG_FILE: &str = "config.json";
pub const BUILDER_FILE: &str = "builder.json";
const GREETING_FILE: &str = "initial_greeting.txt";
const INITIALIZATION_FILE: &str = "initialization_message.txt";
const DESCRIPTION_FILE: &str = "instance_description.txt";

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance `{0}` not found")]
    NotFound(String),
    #[error("instance invalid: {reason}")]
    Invalid { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A fully loaded tenant.  Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub description: String,
    pub greeting: Option<String>,
    pub initialization_message: Option<String>,
    pub system_prompt: String,
    /// Lowercase hex SHA-256 of `system_prompt`.
    pub prompt_hash: String,
    pub config: TenantConfig,
    pub dir: PathBuf,
}

pub struct InstanceRegistry {
    root: PathBuf,
}

impl InstanceRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate tenants, sorted by id for stable output.
    pub fn list(&self) -> Vec<TenantSummary> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut summaries: Vec<TenantSummary> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                let dir = entry.path();
                dir.join(CONFIG_FILE).is_file() && dir.join(BUILDER_FILE).is_file()
            })
            .filter_map(|entry| {
                let id = entry.file_name().to_string_lossy().into_owned();
                let builder = read_builder(&entry.path()).ok()?;
                Some(TenantSummary {
                    name: builder.name.clone().unwrap_or_else(|| id.clone()),
                    description: read_override(&entry.path(), DESCRIPTION_FILE)
                        .or(builder.description)
                        .unwrap_or_default(),
                    id,
                })
            })
            .collect();

        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Cheap existence check for gatekeeping.
    pub fn validate(&self, instance_id: &str) -> bool {
        let dir = self.root.join(instance_id);
        dir.join(CONFIG_FILE).is_file() && dir.join(BUILDER_FILE).is_file()
    }

    /// Load a tenant, materializing its system prompt.
    pub fn load(&self, instance_id: &str) -> Result<Tenant, InstanceError> {
        if !self.validate(instance_id) {
            return Err(InstanceError::NotFound(instance_id.to_string()));
        }
        let dir = self.root.join(instance_id);

        let config_raw = fs::read_to_string(dir.join(CONFIG_FILE)).map_err(|err| {
            InstanceError::Invalid { reason: format!("read {CONFIG_FILE}: {err}") }
        })?;
        let config: TenantConfig = serde_json::from_str(&config_raw).map_err(|err| {
            InstanceError::Invalid { reason: format!("parse {CONFIG_FILE}: {err}") }
        })?;

        let builder = read_builder(&dir)?;

        // Layered fragments in fixed assembly order.
        let layers: [(&str, Option<&FragmentSource>); 4] = [
            ("Instrucciones iniciales", builder.initial_instructions.as_ref()),
            ("Configuración base", builder.base_config.as_ref()),
            ("Configuración funcional", builder.functional_config.as_ref()),
            ("Configuración de citas", builder.citation_config.as_ref()),
        ];
        let mut sections = Vec::new();
        for (header, fragment) in layers {
            let Some(fragment) = fragment else { continue };
            let body = fragment.resolve(&self.root, &dir)?;
            let body = body.trim();
            if body.is_empty() {
                continue;
            }
            sections.push(format!("## {header}\n\n{body}"));
        }
        let system_prompt = sections.join("\n\n");

        let mut hasher = Sha256::new();
        hasher.update(system_prompt.as_bytes());
        let prompt_hash = format!("{:x}", hasher.finalize());

        debug!(instance_id, hash = %prompt_hash, "tenant loaded");

        Ok(Tenant {
            id: instance_id.to_string(),
            name: builder.name.clone().unwrap_or_else(|| instance_id.to_string()),
            description: read_override(&dir, DESCRIPTION_FILE)
                .or(builder.description.clone())
                .unwrap_or_default(),
            greeting: read_override(&dir, GREETING_FILE).or(builder.greeting.clone()),
            initialization_message: read_override(&dir, INITIALIZATION_FILE)
                .or(builder.initialization_message.clone()),
            system_prompt,
            prompt_hash,
            config,
            dir,
        })
    }
}

fn read_builder(dir: &Path) -> Result<PromptBuilder, InstanceError> {
    let raw = fs::read_to_string(dir.join(BUILDER_FILE)).map_err(|err| {
        InstanceError::Invalid { reason: format!("read {BUILDER_FILE}: {err}") }
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| InstanceError::Invalid { reason: format!("parse {BUILDER_FILE}: {err}") })
}

/// Sibling text file override, trimmed; `None` when absent or empty.
fn read_override(dir: &Path, file: &str) -> Option<String> {
    let text = fs::read_to_string(dir.join(file)).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_tenant(root: &Path, id: &str, builder: &str) {
        let dir = root.join(id);
        fs::create_dir_all(dir.join("prompts")).unwrap();
        fs::write(dir.join(CONFIG_FILE), r#"{"model": "gpt-4o"}"#).unwrap();
        fs::write(dir.join(BUILDER_FILE), builder).unwrap();
    }

    #[test]
    fn list_only_includes_complete_tenants() {
        let root = tempfile::tempdir().unwrap();
        write_tenant(root.path(), "general", r#"{"initial_instructions": "hola"}"#);
        write_tenant(root.path(), "tributario", r#"{"initial_instructions": "hola"}"#);
        // A directory without both records does not qualify.
        fs::create_dir_all(root.path().join("incompleto")).unwrap();
        fs::write(root.path().join("incompleto").join(CONFIG_FILE), "{}").unwrap();

        let registry = InstanceRegistry::new(root.path());
        let ids: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["general".to_string(), "tributario".to_string()]);
    }

    #[test]
    fn load_unknown_tenant_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(root.path());
        assert!(matches!(
            registry.load("nadie"),
            Err(InstanceError::NotFound(_))
        ));
    }

    #[test]
    fn prompt_assembly_is_deterministic() {
        let root = tempfile::tempdir().unwrap();
        write_tenant(
            root.path(),
            "general",
            r#"{
                "initial_instructions": "Eres un asistente legal chileno.",
                "base_config": {"path": "./prompts/base.txt"},
                "functional_config": "Responde en español."
            }"#,
        );
        fs::write(
            root.path().join("general/prompts/base.txt"),
            "Cita siempre la fuente.",
        )
        .unwrap();

        let registry = InstanceRegistry::new(root.path());
        let first = registry.load("general").unwrap();
        let second = registry.load("general").unwrap();

        assert_eq!(first.prompt_hash, second.prompt_hash);
        assert!(first.system_prompt.contains("## Instrucciones iniciales"));
        assert!(first.system_prompt.contains("Cita siempre la fuente."));
        assert!(first.system_prompt.contains("## Configuración funcional"));
        // Section order is fixed.
        let base = first.system_prompt.find("Cita siempre").unwrap();
        let funcional = first.system_prompt.find("Responde en español").unwrap();
        assert!(base < funcional);
    }

    #[test]
    fn missing_fragment_file_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        write_tenant(
            root.path(),
            "general",
            r#"{"initial_instructions": {"path": "./prompts/no-existe.txt"}}"#,
        );

        let registry = InstanceRegistry::new(root.path());
        assert!(matches!(
            registry.load("general"),
            Err(InstanceError::Invalid { .. })
        ));
    }

    #[test]
    fn sibling_files_override_builder_fields() {
        let root = tempfile::tempdir().unwrap();
        write_tenant(
            root.path(),
            "general",
            r#"{"initial_instructions": "x", "greeting": "hola del builder"}"#,
        );
        fs::write(
            root.path().join("general").join(GREETING_FILE),
            "Bienvenido al asistente.\n",
        )
        .unwrap();

        let registry = InstanceRegistry::new(root.path());
        let tenant = registry.load("general").unwrap();
        assert_eq!(tenant.greeting.as_deref(), Some("Bienvenido al asistente."));
        assert!(tenant.initialization_message.is_none());
    }

    #[test]
    fn validate_matches_list_membership() {
        let root = tempfile::tempdir().unwrap();
        write_tenant(root.path(), "general", r#"{"initial_instructions": "x"}"#);

        let registry = InstanceRegistry::new(root.path());
        assert!(registry.validate("general"));
        assert!(!registry.validate("ausente"));
    }
}
