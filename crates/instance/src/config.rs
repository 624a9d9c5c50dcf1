//! Per-tenant configuration record (`config.json`).  Immutable for a given
//! process load; every section falls back to defaults so sparse tenant
//! configs stay valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// `"streaming"` or `"buffered"`.
    pub api_mode: String,
    pub memory: MemorySettings,
    pub tools: ToolSettings,
    pub context: ContextSettings,
    pub instance_files: InstanceFilesSettings,
    /// Directive prepended to the normative annex model view.
    pub citation_verification_directive: Option<String>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            api_mode: "streaming".to_string(),
            memory: MemorySettings::default(),
            tools: ToolSettings::default(),
            context: ContextSettings::default(),
            instance_files: InstanceFilesSettings::default(),
            citation_verification_directive: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Rolling window: the prompt carries the last `2 × max_history` entries.
    pub max_history: usize,
    pub max_chat_interactions: u32,
    /// `remaining ≤ warning_threshold` marks the chat as near its limit.
    pub warning_threshold: u32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_history: 10,
            max_chat_interactions: 50,
            warning_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolSettings {
    pub retrieval_enabled: bool,
    pub web_search_enabled: bool,
    pub url_validation_enabled: bool,
    /// Require explicit source attribution in answers that used search.
    pub citation_enforcement: bool,
    pub vector_store_ids: Vec<String>,
    /// Domains the web-search tool may draw from.
    pub allowed_domains: Vec<String>,
    pub web_navigation: WebNavigationSettings,
    /// Extra provider tool entries appended verbatim after the derived set.
    pub extra_tools: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebNavigationSettings {
    pub enabled: bool,
    /// `"allowlist"` or `"denylist"`.  Under allowlist mode the deny list is
    /// ignored.
    pub mode: String,
    pub allow_domains: Vec<String>,
    pub deny_domains: Vec<String>,
    pub max_pages: usize,
    pub max_depth: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for WebNavigationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "allowlist".to_string(),
            allow_domains: Vec::new(),
            deny_domains: Vec::new(),
            max_pages: 5,
            max_depth: 1,
            timeout_secs: 10,
            user_agent: "lexgate/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub inject_datetime: bool,
    pub inject_locale: bool,
    pub timezone: String,
    /// `"es"` or `"en"`.
    pub locale: String,
    pub country: String,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            inject_datetime: true,
            inject_locale: false,
            timezone: "America/Santiago".to_string(),
            locale: "es".to_string(),
            country: "Chile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceFilesSettings {
    pub enabled: bool,
    pub max_file_chars: usize,
    pub max_total_chars: usize,
}

impl Default for InstanceFilesSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_chars: 8_000,
            max_total_chars: 24_000,
        }
    }
}
