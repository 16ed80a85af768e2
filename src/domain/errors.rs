//! Domain errors for the arbiter system.

use thiserror::Error;

/// Domain-level errors surfaced by arbiters, their queues and their stores.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Backpressure: the bounded task queue is at capacity.
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The arbiter's circuit breaker is open and refuses calls.
    #[error("Circuit breaker is open; retry after {retry_after}")]
    CircuitOpen {
        retry_after: chrono::DateTime<chrono::Utc>,
    },

    #[error("Task timed out after {timeout_ms}ms")]
    TaskTimeout { timeout_ms: u64 },

    /// A single generator call failed. Absorbed by fusion, never propagated
    /// out of a routing query.
    #[error("Generator '{generator}' failed: {message}")]
    GenerationFailure { generator: String, message: String },

    #[error("Arbiter '{arbiter}' lacks required capability '{capability}'")]
    CapabilityMissing { capability: String, arbiter: String },

    #[error("Arbiter is shutting down and no longer accepts tasks")]
    ShuttingDown,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether a task that failed with this error may be retried under its
    /// retry budget.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TaskTimeout { .. }
                | Self::GenerationFailure { .. }
                | Self::ExecutionFailed(_)
                | Self::StorageError(_)
        )
    }

    /// Short machine-readable tag used in events and the error log.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "queue_full",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::TaskTimeout { .. } => "task_timeout",
            Self::GenerationFailure { .. } => "generation_failure",
            Self::CapabilityMissing { .. } => "capability_missing",
            Self::ShuttingDown => "shutting_down",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::StorageError(_) => "storage",
            Self::SerializationError(_) => "serialization",
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Errors returned by a generation capability.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Failed to parse generator response: {0}")]
    Parse(String),

    #[error("Generator returned an empty completion")]
    EmptyResponse,

    #[error("Generator request timed out after {0}s")]
    Timeout(u64),

    #[error("Generator circuit is open until {0}")]
    CircuitOpen(chrono::DateTime<chrono::Utc>),

    #[error("Generator not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DomainError::TaskTimeout { timeout_ms: 10 }.is_retryable());
        assert!(DomainError::ExecutionFailed("boom".into()).is_retryable());
        assert!(!DomainError::QueueFull { capacity: 1 }.is_retryable());
        assert!(!DomainError::CircuitOpen {
            retry_after: chrono::Utc::now()
        }
        .is_retryable());
        assert!(!DomainError::CapabilityMissing {
            capability: "cloning".into(),
            arbiter: "a".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DomainError::QueueFull { capacity: 1000 };
        assert_eq!(err.to_string(), "Task queue is full (capacity 1000)");
        assert_eq!(err.kind(), "queue_full");
    }
}
