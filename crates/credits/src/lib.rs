//! Credit accounting — user records on disk and the cost-based debit applied
//! after each completed turn.
//!
//! The balance check and decrement are an atomic read-modify-write: debits
//! for the same user serialize on a per-user mutex shard, so two concurrent
//! turns can never spend the same credit twice.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use lexgate_config::{PricingConfig, TokenUsage};

/// Minimum possible debit; the pre-check floor.
pub const COST_FLOOR: i64 = 1;

const SHARDS: usize = 16;

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("insufficient credits: available {available}, required {required}")]
    Insufficient { available: i64, required: i64 },
    #[error("user record error: {0}")]
    Store(String),
}

/// Persisted per-user record (`<users_root>/<user_id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserRecord {
    pub credit_balance: i64,
    pub total_assigned: i64,
    pub display_name: Option<String>,
    pub general_context: Option<String>,
}

/// One applied (or synthesized) debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDebit {
    pub credits: i64,
    pub cost_usd: f64,
    pub balance_after: i64,
    #[serde(rename = "fromCache")]
    pub from_cache: bool,
}

impl CreditDebit {
    /// Zero-cost annotation for a cache hit.
    pub fn cached(balance: i64) -> Self {
        Self { credits: 0, cost_usd: 0.0, balance_after: balance, from_cache: true }
    }
}

pub struct CreditManager {
    root: PathBuf,
    pricing: PricingConfig,
    shards: Vec<Mutex<()>>,
}

impl CreditManager {
    pub fn new(root: impl Into<PathBuf>, pricing: PricingConfig) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            pricing,
            shards: (0..SHARDS).map(|_| Mutex::new(())).collect(),
        })
    }

    fn shard(&self, user_id: &str) -> &Mutex<()> {
        let mut hash = 0usize;
        for byte in user_id.bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
        }
        &self.shards[hash % SHARDS]
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{user_id}.json"))
    }

    pub fn load_user(&self, user_id: &str) -> UserRecord {
        fs::read_to_string(self.user_path(user_id))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_user(&self, user_id: &str, record: &UserRecord) -> Result<(), CreditError> {
        fs::create_dir_all(&self.root)
            .map_err(|err| CreditError::Store(err.to_string()))?;
        let rendered = serde_json::to_string_pretty(record)
            .map_err(|err| CreditError::Store(err.to_string()))?;
        fs::write(self.user_path(user_id), rendered)
            .map_err(|err| CreditError::Store(err.to_string()))
    }

    /// Credits owed for a turn: `max(1, ceil(cost_usd / usd_per_credit))`.
    pub fn credits_for(&self, model: &str, usage: &TokenUsage) -> (i64, f64) {
        let cost_usd = self.pricing.cost_usd(model, usage);
        let credits = (cost_usd / self.pricing.usd_per_credit).ceil() as i64;
        (credits.max(COST_FLOOR), cost_usd)
    }

    /// Pre-check: fail fast before opening a stream when the user cannot
    /// afford even the minimum debit.
    pub async fn check_floor(&self, user_id: &str) -> Result<i64, CreditError> {
        let _guard = self.shard(user_id).lock().await;
        let record = self.load_user(user_id);
        if record.credit_balance < COST_FLOOR {
            return Err(CreditError::Insufficient {
                available: record.credit_balance,
                required: COST_FLOOR,
            });
        }
        Ok(record.credit_balance)
    }

    /// Atomically debit the user for a completed turn.
    pub async fn debit(
        &self,
        user_id: &str,
        model: &str,
        usage: &TokenUsage,
    ) -> Result<CreditDebit, CreditError> {
        let (credits, cost_usd) = self.credits_for(model, usage);
        let _guard = self.shard(user_id).lock().await;

        let mut record = self.load_user(user_id);
        if record.credit_balance < credits {
            warn!(
                user_id,
                available = record.credit_balance,
                required = credits,
                "debit below balance after completed turn"
            );
            return Err(CreditError::Insufficient {
                available: record.credit_balance,
                required: credits,
            });
        }

        record.credit_balance -= credits;
        self.save_user(user_id, &record)?;
        debug!(user_id, credits, balance = record.credit_balance, "credits debited");

        Ok(CreditDebit {
            credits,
            cost_usd,
            balance_after: record.credit_balance,
            from_cache: false,
        })
    }

    /// Return credits to a user.  Compensates a debit whose turn could not
    /// be persisted, so a failed turn never leaves the balance reduced.
    pub async fn refund(&self, user_id: &str, credits: i64) -> Result<(), CreditError> {
        if credits <= 0 {
            return Ok(());
        }
        let _guard = self.shard(user_id).lock().await;
        let mut record = self.load_user(user_id);
        record.credit_balance += credits;
        self.save_user(user_id, &record)?;
        debug!(user_id, credits, balance = record.credit_balance, "credits refunded");
        Ok(())
    }

    /// Seed or replace a user record; used by provisioning and tests.
    pub fn put_user(&self, user_id: &str, record: UserRecord) -> Result<(), CreditError> {
        self.save_user(user_id, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(balance: i64) -> (tempfile::TempDir, Arc<CreditManager>) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CreditManager::new(dir.path(), PricingConfig::default());
        manager
            .put_user(
                "u1",
                UserRecord {
                    credit_balance: balance,
                    total_assigned: balance,
                    ..Default::default()
                },
            )
            .unwrap();
        (dir, manager)
    }

    #[test]
    fn missing_user_reads_zeroed_record() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CreditManager::new(dir.path(), PricingConfig::default());
        let record = manager.load_user("nadie");
        assert_eq!(record.credit_balance, 0);
    }

    #[test]
    fn credits_floor_at_one() {
        let (_dir, manager) = manager(100);
        // A tiny turn still costs one credit.
        let (credits, cost) = manager.credits_for("gpt-4o-mini", &TokenUsage::new(10, 10));
        assert_eq!(credits, 1);
        assert!(cost > 0.0);
    }

    #[test]
    fn credits_scale_with_cost() {
        let (_dir, manager) = manager(100);
        // 100k/100k tokens on gpt-4o: 0.25 + 1.0 USD = 125 credits at 0.01.
        let (credits, _) = manager.credits_for("gpt-4o", &TokenUsage::new(100_000, 100_000));
        assert_eq!(credits, 125);
    }

    #[tokio::test]
    async fn debit_decreases_balance() {
        let (_dir, manager) = manager(100);
        let debit = manager
            .debit("u1", "gpt-4o-mini", &TokenUsage::new(100, 100))
            .await
            .unwrap();
        assert_eq!(debit.credits, 1);
        assert_eq!(debit.balance_after, 99);
        assert!(!debit.from_cache);
        assert_eq!(manager.load_user("u1").credit_balance, 99);
    }

    #[tokio::test]
    async fn failed_debit_leaves_balance_unchanged() {
        let (_dir, manager) = manager(0);
        let err = manager
            .debit("u1", "gpt-4o", &TokenUsage::new(100, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Insufficient { .. }));
        assert_eq!(manager.load_user("u1").credit_balance, 0);
    }

    #[tokio::test]
    async fn floor_check_rejects_empty_balance() {
        let (_dir, broke) = manager(0);
        assert!(broke.check_floor("u1").await.is_err());

        let (_dir2, funded) = manager(5);
        assert_eq!(funded.check_floor("u1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn refund_restores_balance() {
        let (_dir, manager) = manager(100);
        let debit = manager
            .debit("u1", "gpt-4o-mini", &TokenUsage::new(100, 100))
            .await
            .unwrap();
        manager.refund("u1", debit.credits).await.unwrap();
        assert_eq!(manager.load_user("u1").credit_balance, 100);
    }

    #[test]
    fn cached_debit_is_zero_cost() {
        let debit = CreditDebit::cached(42);
        assert_eq!(debit.credits, 0);
        assert!(debit.from_cache);
        assert_eq!(debit.balance_after, 42);
    }
}
