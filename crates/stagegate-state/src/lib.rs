//! stagegate-state — embedded state store for StageGate.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for rollouts, verdict history, rollback actions, and
//! the transition audit trail.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{rollout_id}:{seq}`) enable ordered prefix scans over
//! per-rollout history. The verdict and transition tables are append-only:
//! the store exposes no update or delete operation for them.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across the per-rollout control loops.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
