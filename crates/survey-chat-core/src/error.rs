//! Error taxonomy shared by every core operation.

use thiserror::Error;

/// Errors produced by retrieval, introspection, and the orchestrator.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A referenced survey or conversation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input such as `k < 1` or an empty required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding provider failed (quota, timeout, bad response).
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The store rejected a generated query. `message` is the backend's
    /// error text, unmodified.
    #[error("query execution failed: {message}")]
    QueryExecution { query: String, message: String },

    /// A message role outside `user | assistant | tool | system`.
    #[error("invalid role: '{0}'")]
    InvalidRole(String),

    /// The language model completion call failed.
    #[error("language model error: {0}")]
    LanguageModel(String),

    /// Any other storage backend failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}
