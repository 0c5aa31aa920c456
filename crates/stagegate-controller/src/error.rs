//! Controller error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors that can occur while controlling rollouts.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The pre-deploy gate blocked rollout creation. Never retried; no
    /// rollout object exists.
    #[error("pre-deploy gate blocked rollout: {}", violated_rules(.0))]
    GateRejected(stagegate_gate::GateResult),

    #[error("rollout not found: {0}")]
    NotFound(String),

    #[error("rollout already registered: {0}")]
    AlreadyRegistered(String),

    #[error("rollout {0} has no stages")]
    NoStages(String),

    #[error("stage weights must be non-decreasing and at most 100 ({0})")]
    InvalidStageWeights(String),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: stagegate_state::RolloutStatus,
        to: stagegate_state::RolloutStatus,
    },

    #[error("rollback already in flight for {0}")]
    RollbackInFlight(String),

    /// Remediation retries exhausted; requires human intervention.
    #[error("rollback exhausted for {id} after {attempts} attempts")]
    RollbackExhausted { id: String, attempts: u32 },

    #[error("deployment backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    State(#[from] stagegate_state::StateError),
}

fn violated_rules(result: &stagegate_gate::GateResult) -> String {
    result
        .violations
        .iter()
        .map(|v| v.rule.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
