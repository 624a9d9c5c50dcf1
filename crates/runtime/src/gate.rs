//! Per-chat concurrency gate — turns for the same `(user, chat)` pair run
//! one at a time, while distinct pairs proceed in parallel.  A sharded map
//! of keyed mutexes bounds growth: shards are fixed, keyed entries are
//! created on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, OwnedMutexGuard};

const SHARDS: usize = 16;

pub struct TurnGate {
    shards: Vec<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Default for TurnGate {
    fn default() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| StdMutex::new(HashMap::new())).collect(),
        }
    }
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `(user_id, chat_id)`, waiting if a turn for the
    /// same pair is in flight.  The guard releases on drop, on success and
    /// error paths alike.
    pub async fn acquire(&self, user_id: &str, chat_id: &str) -> OwnedMutexGuard<()> {
        let key = format!("{user_id}:{chat_id}");
        let entry = {
            let mut shard = self.shards[shard_index(&key)].lock().expect("gate shard lock");
            shard.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

fn shard_index(key: &str) -> usize {
    let mut hash = 0usize;
    for byte in key.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as usize);
    }
    hash % SHARDS
}
