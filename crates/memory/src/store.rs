use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use lexgate_config::TokenUsage;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("memory serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageRole {
    User,
    Assistant,
    SystemAnnex,
    SystemInit,
}

/// One persisted log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annex: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    fn now(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            usage: None,
            annex: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-chat interaction accounting, wire-shaped for the terminal event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InteractionStatus {
    pub current: u32,
    pub max: u32,
    pub remaining: u32,
    #[serde(rename = "isLimitReached")]
    pub limit_reached: bool,
    #[serde(rename = "isNearLimit")]
    pub near_limit: bool,
}

impl InteractionStatus {
    pub fn compute(current: u32, max: u32, warning_threshold: u32) -> Self {
        let remaining = max.saturating_sub(current);
        Self {
            current,
            max,
            remaining,
            limit_reached: current >= max,
            near_limit: remaining <= warning_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn log_path(&self, user_id: &str, chat_id: &str) -> PathBuf {
        self.root.join(user_id).join(format!("{chat_id}.json"))
    }

    fn turns_path(&self, user_id: &str, chat_id: &str) -> PathBuf {
        self.root.join(user_id).join(format!("{chat_id}_turns.json"))
    }

    /// All stored messages in insertion order; empty on a missing file.
    pub fn load_context(&self, user_id: &str, chat_id: &str) -> Vec<StoredMessage> {
        read_log(&self.log_path(user_id, chat_id))
    }

    /// Append the user question and assistant answer (plus the annex entry
    /// when present), then truncate the log from the front to at most
    /// `2 × max_history` entries.
    pub fn save_turn(
        &self,
        user_id: &str,
        chat_id: &str,
        question: &str,
        answer: &str,
        usage: TokenUsage,
        annex: Option<serde_json::Value>,
        max_history: usize,
    ) -> Result<(), MemoryError> {
        let path = self.log_path(user_id, chat_id);
        let mut log = read_log(&path);

        log.push(StoredMessage::now(MessageRole::User, question));

        let mut assistant = StoredMessage::now(MessageRole::Assistant, answer);
        assistant.usage = Some(usage);
        log.push(assistant);

        if let Some(annex) = annex.filter(|a| !annex_is_empty(a)) {
            let mut entry = StoredMessage::now(
                MessageRole::SystemAnnex,
                serde_json::to_string(&json!({
                    "annex": annex.clone(),
                    "generated_at": Utc::now(),
                }))?,
            );
            entry.annex = Some(annex);
            log.push(entry);
        }

        let cap = max_history.saturating_mul(2);
        if cap > 0 && log.len() > cap {
            let excess = log.len() - cap;
            log.drain(..excess);
            debug!(user_id, chat_id, dropped = excess, "memory log trimmed");
        }

        write_json(&path, &log)
    }

    /// Append the tenant's silent initialization entry once.  A log that
    /// already starts with one is left untouched.
    pub fn record_initialization(
        &self,
        user_id: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<(), MemoryError> {
        let path = self.log_path(user_id, chat_id);
        let mut log = read_log(&path);
        if matches!(log.first(), Some(entry) if entry.role == MessageRole::SystemInit) {
            return Ok(());
        }
        log.insert(0, StoredMessage::now(MessageRole::SystemInit, text));
        write_json(&path, &log)
    }

    pub fn load_turn_count(&self, user_id: &str, chat_id: &str) -> u32 {
        let path = self.turns_path(user_id, chat_id);
        fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|value| value.get("turns").and_then(|t| t.as_u64()))
            .map(|turns| turns as u32)
            .unwrap_or(0)
    }

    pub fn save_turn_count(
        &self,
        user_id: &str,
        chat_id: &str,
        turns: u32,
    ) -> Result<(), MemoryError> {
        write_json(
            &self.turns_path(user_id, chat_id),
            &json!({ "turns": turns, "updated_at": Utc::now() }),
        )
    }

    pub fn interaction_status(
        &self,
        user_id: &str,
        chat_id: &str,
        max: u32,
        warning_threshold: u32,
    ) -> InteractionStatus {
        InteractionStatus::compute(self.load_turn_count(user_id, chat_id), max, warning_threshold)
    }
}

fn annex_is_empty(annex: &serde_json::Value) -> bool {
    match annex {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn read_log(path: &Path) -> Vec<StoredMessage> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(MemoryError::Write)?;
    }
    let rendered = serde_json::to_string_pretty(value)?;
    fs::write(path, rendered).map_err(MemoryError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path());
        (dir, store)
    }

    fn usage() -> TokenUsage {
        TokenUsage::new(10, 20)
    }

    #[test]
    fn missing_log_reads_empty() {
        let (_dir, store) = store();
        assert!(store.load_context("u1", "c1").is_empty());
        assert_eq!(store.load_turn_count("u1", "c1"), 0);
    }

    #[test]
    fn save_turn_appends_in_order() {
        let (_dir, store) = store();
        store.save_turn("u1", "c1", "hola", "buenas", usage(), None, 10).unwrap();
        store.save_turn("u1", "c1", "¿y ahora?", "seguimos", usage(), None, 10).unwrap();

        let log = store.load_context("u1", "c1");
        assert_eq!(log.len(), 4);
        assert_eq!(log[0].role, MessageRole::User);
        assert_eq!(log[0].content, "hola");
        assert_eq!(log[1].role, MessageRole::Assistant);
        assert_eq!(log[1].usage, Some(usage()));
        assert_eq!(log[2].content, "¿y ahora?");
        assert_eq!(log[3].content, "seguimos");
    }

    #[test]
    fn annex_entry_appended_when_present() {
        let (_dir, store) = store();
        let annex = json!([{ "key": "CCCH.Art1545", "url": "https://x" }]);
        store.save_turn("u1", "c1", "q", "a", usage(), Some(annex.clone()), 10).unwrap();

        let log = store.load_context("u1", "c1");
        assert_eq!(log.len(), 3);
        assert_eq!(log[2].role, MessageRole::SystemAnnex);
        assert_eq!(log[2].annex, Some(annex));
        // The content is machine-parseable and carries a timestamp.
        let parsed: serde_json::Value = serde_json::from_str(&log[2].content).unwrap();
        assert!(parsed.get("generated_at").is_some());
        assert!(parsed["annex"].is_array());
    }

    #[test]
    fn empty_annex_is_not_appended() {
        let (_dir, store) = store();
        store.save_turn("u1", "c1", "q", "a", usage(), Some(json!([])), 10).unwrap();
        assert_eq!(store.load_context("u1", "c1").len(), 2);
    }

    #[test]
    fn log_trims_from_front_to_window() {
        let (_dir, store) = store();
        for i in 0..5 {
            store
                .save_turn("u1", "c1", &format!("q{i}"), &format!("a{i}"), usage(), None, 3)
                .unwrap();
        }

        let log = store.load_context("u1", "c1");
        assert_eq!(log.len(), 6); // 2 × max_history
        assert_eq!(log[0].content, "q2");
        assert_eq!(log[5].content, "a4");
    }

    #[test]
    fn turn_count_roundtrip() {
        let (_dir, store) = store();
        store.save_turn_count("u1", "c1", 7).unwrap();
        assert_eq!(store.load_turn_count("u1", "c1"), 7);
    }

    #[test]
    fn interaction_status_thresholds() {
        let status = InteractionStatus::compute(45, 50, 5);
        assert!(!status.limit_reached);
        assert!(status.near_limit);
        assert_eq!(status.remaining, 5);

        let full = InteractionStatus::compute(50, 50, 5);
        assert!(full.limit_reached);
        assert_eq!(full.remaining, 0);

        let fresh = InteractionStatus::compute(0, 50, 5);
        assert!(!fresh.limit_reached);
        assert!(!fresh.near_limit);
    }

    #[test]
    fn initialization_entry_is_idempotent() {
        let (_dir, store) = store();
        store.record_initialization("u1", "c1", "contexto inicial").unwrap();
        store.record_initialization("u1", "c1", "contexto inicial").unwrap();

        let log = store.load_context("u1", "c1");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, MessageRole::SystemInit);
    }

    #[test]
    fn role_serialization_is_kebab_case() {
        let annex = StoredMessage::now(MessageRole::SystemAnnex, "x");
        let raw = serde_json::to_string(&annex).unwrap();
        assert!(raw.contains("\"system-annex\""));
    }

    #[test]
    fn distinct_chats_are_isolated() {
        let (_dir, store) = store();
        store.save_turn("u1", "c1", "q", "a", usage(), None, 10).unwrap();
        store.save_turn("u1", "c2", "otro", "log", usage(), None, 10).unwrap();

        assert_eq!(store.load_context("u1", "c1").len(), 2);
        assert_eq!(store.load_context("u1", "c2")[0].content, "otro");
    }
}
