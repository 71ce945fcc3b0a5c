//! Unified error type for the Soulkun pipeline.
//!
//! All crates use this for propagation across boundaries. Variants carry a
//! String payload; module-internal errors are converted at the boundary.
//! None of these strings may reach a user-visible reply — user-facing
//! failure text always comes from [`crate::tools::ErrorKind`] or an
//! evaluator's designed message.

/// Pipeline-wide error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    /// LLM provider failure (connection, status, deserialization).
    #[error("llm provider error: {0}")]
    Llm(String),

    /// Storage failure (open, query, migration).
    #[error("storage error: {0}")]
    Storage(String),

    /// Channel adapter failure (send, webhook parse).
    #[error("channel error: {0}")]
    Channel(String),

    /// Tool catalog or handler failure.
    #[error("tool error: {0}")]
    Tool(String),

    /// Configuration load or validation failure.
    #[error("config error: {0}")]
    Config(String),

    /// An external call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BrainError {
    fn from(err: serde_json::Error) -> Self {
        BrainError::Serialization(err.to_string())
    }
}
