//! Error types for depositflow

use thiserror::Error;

/// Errors raised by the store, the engine and the draft protocol
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Unknown instance, object, draft or field
    #[error("{what} not found")]
    NotFound { what: String },

    /// A transform or form rejected its input; nothing was applied
    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// A conflicting write won the race; the caller should retry
    #[error("concurrent update on workflow {id}")]
    Concurrency { id: String },

    /// A task unit failed while the engine was running it
    #[error("task '{task}' failed at position {position}: {message}")]
    Task {
        task: String,
        position: String,
        message: String,
    },

    #[error("no chain registered under '{name}'")]
    UnknownChain { name: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![message.into()],
        }
    }

    /// Returns true if retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Concurrency { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkflowError::NotFound { .. })
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
