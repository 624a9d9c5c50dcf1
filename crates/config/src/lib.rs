use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variable holding the LLM provider API key.
pub const API_KEY_VAR: &str = "LEXGATE_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Tenant used when a turn arrives without an instance binding.
    pub default_instance: String,
    /// `"streaming"` or `"buffered"` — per-tenant configs may override.
    pub api_mode: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_instance: "general".to_string(),
            api_mode: "streaming".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub instances_root: String,
    pub memory_root: String,
    pub users_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            instances_root: "instances".to_string(),
            memory_root: "historial".to_string(),
            users_root: "users".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the provider API.  Overridden at runtime by the
    /// `LEXGATE_BASE_URL` environment variable when set.
    pub base_url: String,
    pub default_model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Whole-turn deadline covering streaming plus post-processing.
    pub turn_deadline_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
            default_temperature: 0.3,
            default_max_tokens: 4096,
            request_timeout_secs: 120,
            turn_deadline_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Optional remote backend address.  Absent means the in-process
    /// backend; caching can be disabled entirely with `enabled = false`.
    pub backend_addr: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            backend_addr: None,
        }
    }
}

/// Token accounting for one completed turn, as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Per-1K-token USD rates for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Process-wide pricing table.  Immutable for a process lifetime; credit
/// debits are derived from it, never hard-coded at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub usd_per_credit: f64,
    /// Rate applied when a model has no explicit entry.
    pub fallback: ModelPrice,
    pub models: HashMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4o".to_string(),
            ModelPrice { input_per_1k: 0.0025, output_per_1k: 0.01 },
        );
        models.insert(
            "gpt-4o-mini".to_string(),
            ModelPrice { input_per_1k: 0.00015, output_per_1k: 0.0006 },
        );
        Self {
            usd_per_credit: 0.01,
            fallback: ModelPrice { input_per_1k: 0.0025, output_per_1k: 0.01 },
            models,
        }
    }
}

impl PricingConfig {
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.models.get(model).copied().unwrap_or(self.fallback)
    }

    /// USD cost of a turn.
    pub fn cost_usd(&self, model: &str, usage: &TokenUsage) -> f64 {
        let price = self.price_for(model);
        (usage.input_tokens as f64 / 1000.0) * price.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * price.output_per_1k
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub pricing: PricingConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("LEXGATE_BASE_URL") {
            if !value.is_empty() {
                config.llm.base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

/// Read the provider API key, loading a `.env` file first when present.
pub fn api_key() -> Option<String> {
    let _ = dotenvy::dotenv();
    env::var(API_KEY_VAR).ok().filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.default_instance, "general");
        assert_eq!(config.cache.ttl_secs, 3_600);
        assert!(config.cache.enabled);
        assert!(config.pricing.usd_per_credit > 0.0);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = AppConfig::load_from("/nonexistent/lexgate.toml").unwrap();
        assert_eq!(config.llm.default_model, AppConfig::default().llm.default_model);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexgate.toml");

        let mut config = AppConfig::default();
        config.server.default_instance = "tributario".to_string();
        config.cache.ttl_secs = 120;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.default_instance, "tributario");
        assert_eq!(loaded.cache.ttl_secs, 120);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexgate.toml");
        fs::write(&path, "[llm]\ndefault_model = \"gpt-4o-mini\"\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.default_model, "gpt-4o-mini");
        assert_eq!(loaded.paths.memory_root, "historial");
    }

    #[test]
    fn pricing_falls_back_for_unknown_model() {
        let pricing = PricingConfig::default();
        let price = pricing.price_for("unknown-model");
        assert_eq!(price.input_per_1k, pricing.fallback.input_per_1k);
    }

    #[test]
    fn cost_usd_combines_both_directions() {
        let pricing = PricingConfig::default();
        let cost = pricing.cost_usd("gpt-4o", &TokenUsage::new(1000, 1000));
        assert!((cost - (0.0025 + 0.01)).abs() < 1e-9);
    }
}
