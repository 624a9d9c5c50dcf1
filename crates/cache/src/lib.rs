//! Response cache — memoizes completed turns so an identical question under
//! an identical configuration does not spend credits twice.
//!
//! The backend is pluggable: the in-process TTL store is the default, and a
//! no-op always-miss store satisfies the contract when caching is disabled.
//! Cache failures are never fatal; callers degrade to a miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3_600);

const NAMESPACE: &str = "resp";

/// Config fields that participate in the cache key.  Two turns share an
/// entry only when all of these match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheKeyConfig {
    pub model: String,
    pub api_mode: String,
    pub retrieval_enabled: bool,
    pub web_search_enabled: bool,
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content-addressed key: truncated config hash + truncated question hash +
/// user id, under the response namespace.
pub fn response_key(question: &str, user_id: &str, config: &CacheKeyConfig) -> String {
    let config_part = sha256_hex(&format!(
        "{}|{}|{}|{}",
        config.model, config.api_mode, config.retrieval_enabled, config.web_search_enabled
    ));
    let question_part = sha256_hex(&normalize_question(question));
    format!(
        "{NAMESPACE}:{}:{}:{}",
        &config_part[..8],
        &question_part[..16],
        user_id
    )
}

/// Key-value cache with per-entry TTL.  Values are serialized blobs; typed
/// wrappers live with the caller.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

// ─── In-process TTL backend ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryTtlCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTtlCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryTtlCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        debug!(key, ttl_secs = ttl.as_secs(), "cache store");
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

// ─── No-op backend ───────────────────────────────────────────────────────────

/// Always-miss cache used when the backend is unavailable or disabled.
pub struct NoopCache;

#[async_trait]
impl ResponseCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_config() -> CacheKeyConfig {
        CacheKeyConfig {
            model: "gpt-4o".to_string(),
            api_mode: "streaming".to_string(),
            retrieval_enabled: true,
            web_search_enabled: false,
        }
    }

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_question("  ¿Qué es   la Ley\t20.190? "),
            "¿qué es la ley 20.190?"
        );
    }

    #[test]
    fn key_is_stable_and_namespaced() {
        let a = response_key("¿Qué es la Ley 20.190?", "user-1", &key_config());
        let b = response_key("  ¿qué es la ley 20.190?  ", "user-1", &key_config());
        assert_eq!(a, b, "normalized questions share a key");
        assert!(a.starts_with("resp:"));

        let parts: Vec<&str> = a.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3], "user-1");
    }

    #[test]
    fn key_varies_by_user_and_config() {
        let base = response_key("hola", "user-1", &key_config());
        assert_ne!(base, response_key("hola", "user-2", &key_config()));

        let mut other = key_config();
        other.retrieval_enabled = false;
        assert_ne!(base, response_key("hola", "user-1", &other));
    }

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let cache = MemoryTtlCache::new();
        cache
            .set("resp:k", "value".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("resp:k").await.as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn expired_entry_misses_and_is_evicted() {
        let cache = MemoryTtlCache::new();
        cache
            .set("resp:k", "value".to_string(), Duration::from_millis(5))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("resp:k").await.is_none());
        assert!(cache.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache.set("k", "v".to_string(), DEFAULT_TTL).await;
        assert!(cache.get("k").await.is_none());
    }
}
