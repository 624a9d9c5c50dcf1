//! Prompt builder record (`builder.json`) — the layered fragments that are
//! concatenated into a tenant's system prompt.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::registry::InstanceError;

/// A prompt fragment: inline text or a reference to a UTF-8 file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FragmentSource {
    Inline(String),
    File { path: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptBuilder {
    pub name: Option<String>,
    pub description: Option<String>,
    pub initial_instructions: Option<FragmentSource>,
    pub base_config: Option<FragmentSource>,
    pub functional_config: Option<FragmentSource>,
    pub citation_config: Option<FragmentSource>,
    pub greeting: Option<String>,
    pub initialization_message: Option<String>,
}

impl FragmentSource {
    /// Resolve this fragment to text.
    ///
    /// Path rule: a path containing the registry-root segment is read from
    /// the process working directory; a path starting with `./` resolves
    /// inside the tenant's own directory; any other form is a configuration
    /// error.
    pub fn resolve(
        &self,
        registry_root: &Path,
        tenant_dir: &Path,
    ) -> Result<String, InstanceError> {
        match self {
            FragmentSource::Inline(text) => Ok(text.clone()),
            FragmentSource::File { path } => {
                let resolved = resolve_fragment_path(path, registry_root, tenant_dir)?;
                fs::read_to_string(&resolved).map_err(|err| InstanceError::Invalid {
                    reason: format!("fragment file {} unreadable: {err}", resolved.display()),
                })
            }
        }
    }
}

fn resolve_fragment_path(
    path: &str,
    registry_root: &Path,
    tenant_dir: &Path,
) -> Result<PathBuf, InstanceError> {
    let root_segment = registry_root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let candidate = Path::new(path);
    let contains_root = !root_segment.is_empty()
        && candidate
            .components()
            .any(|c| matches!(c, Component::Normal(seg) if seg.to_string_lossy() == root_segment));

    if contains_root {
        return Ok(PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("./") {
        return Ok(tenant_dir.join(rest));
    }
    Err(InstanceError::Invalid {
        reason: format!("fragment path `{path}` is neither registry-rooted nor tenant-relative"),
    })
}
