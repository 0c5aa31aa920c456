//! Error types for the StageGate state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid rollout id {0:?}: must be non-empty and contain neither ':' nor ';'")]
    InvalidId(String),

    #[error("rollout not found: {0}")]
    NotFound(String),

    #[error("rollout already exists: {0}")]
    AlreadyExists(String),

    #[error("rollout {0} is terminal and immutable")]
    Terminal(String),
}
