//! stagegate-controller — the rollout control plane.
//!
//! Drives each rollout through its traffic stages using evaluator
//! verdicts, and remediates by rolling traffic back to the baseline.
//!
//! # Components
//!
//! - **`machine`** — the pure rollout transition table (no I/O)
//! - **`backend`** — deployment backend and audit sink collaborator seams
//! - **`executor`** — idempotent, retrying rollback remediation
//! - **`coordinator`** — rollout registry plus one ticker-driven control
//!   loop per rollout
//!
//! # Concurrency model
//!
//! One independent control loop runs per active rollout; rollouts share
//! no mutable state. Within a rollout, every transition happens inside
//! its own loop — operator commands (pause/resume/abort) travel over a
//! channel and are drained at the top of each polling cycle, so they are
//! observed within one interval and never interrupt a cycle midway.

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod machine;

pub use backend::{
    AuditEvent, AuditSink, BackendError, LogSink, MemoryBackend, MemorySink, TrafficBackend,
    TrafficSplit,
};
pub use coordinator::{ControlConfig, Coordinator, OperatorCommand, RolloutRequest};
pub use error::{ControllerError, ControllerResult};
pub use executor::{ExecutorConfig, RollbackExecutor};
