use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for data access operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Data access error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Circuit breaker is open for {dependency}")]
    CircuitOpen { dependency: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Transient I/O error: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Closed classification of [`StoreError`] used by breakers and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    CacheMiss,
    Conflict,
    CircuitOpen,
    Cancelled,
    DeadlineExceeded,
    Transient,
    Serialization,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::CacheMiss => "cache_miss",
            ErrorKind::Conflict => "conflict",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Transient => "transient",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl StoreError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::CacheMiss(_) => ErrorKind::CacheMiss,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            StoreError::Transient(_) => ErrorKind::Transient,
            StoreError::Serialization(_) => ErrorKind::Serialization,
            StoreError::Config(_) => ErrorKind::Config,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The dependency correctly reported that the value does not exist
    pub fn is_absence(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::CacheMiss)
    }

    /// The caller gave up: cancelled explicitly or ran out of time
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// The call was rejected by an open circuit breaker without executing
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, StoreError::CircuitOpen { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::DeadlineExceeded
        } else {
            StoreError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
