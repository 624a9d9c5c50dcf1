//! Rolling conversation memory — per-(user, chat) ordered message logs and
//! per-chat interaction counters persisted as JSON files.
//!
//! Layout: `<memory_root>/<user_id>/<chat_id>.json` for the log and
//! `<memory_root>/<user_id>/<chat_id>_turns.json` for the counter.  Missing
//! files read as empty/zero; write failures surface to the caller, which
//! treats them as a hard failure for the turn.

mod store;

pub use store::{InteractionStatus, MemoryError, MemoryStore, MessageRole, StoredMessage};
