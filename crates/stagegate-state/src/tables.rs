//! redb table definitions for the StageGate state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). History tables key their entries as `{rollout_id}:{seq:010}`
//! so that a prefix scan returns them in append order.

use redb::TableDefinition;

/// Rollouts keyed by `{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Verdict history keyed by `{rollout_id}:{seq:010}`. Append-only.
pub const VERDICTS: TableDefinition<&str, &[u8]> = TableDefinition::new("verdicts");

/// Transition audit trail keyed by `{rollout_id}:{seq:010}`. Append-only.
pub const TRANSITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transitions");

/// Current rollback action keyed by `{rollout_id}`.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Build a history key with a zero-padded sequence for ordered scans.
pub fn history_key(rollout_id: &str, seq: u64) -> String {
    format!("{rollout_id}:{seq:010}")
}

/// The exclusive upper bound of a rollout's history key range.
pub fn history_range_end(rollout_id: &str) -> String {
    // ';' is the successor of ':' in ASCII.
    format!("{rollout_id};")
}
