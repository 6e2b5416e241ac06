use crate::key::Scope;
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Result alias used across the crate.
pub type SResult<T> = Result<T, StateError>;

/// Failures surfaced by user state clients and record stores.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backing record store is unreachable or overloaded. Callers may retry.
    #[error("state service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The caller may not access the requested owner's data.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A single-key read found no record.
    #[error("no stored state for {0}")]
    DoesNotExist(String),

    #[error("only the user_state scope is supported, not {0}")]
    UnsupportedScope(Scope),

    /// Declared capability that this store does not provide.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StateError {
    /// Returns `true` when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StateError::ServiceUnavailable(_))
    }
}

/// Builds an `InvalidInput` error with the provided message.
pub fn invalid_input(message: impl Into<String>) -> StateError {
    StateError::InvalidInput(message.into())
}

/// Builds an `Internal` error for unexpected backend failures.
pub fn internal(message: impl Into<String>) -> StateError {
    StateError::Internal(message.into())
}

/// Builds a `ServiceUnavailable` error for backend outages.
pub fn unavailable(message: impl Into<String>) -> StateError {
    StateError::ServiceUnavailable(message.into())
}

/// Wraps a `serde_json` error as `InvalidInput`.
pub fn from_serde(err: SerdeError) -> StateError {
    invalid_input(err.to_string())
}

#[cfg(feature = "redis")]
/// Wraps a Redis error as `ServiceUnavailable`.
pub fn from_redis(err: redis::RedisError, context: impl Into<String>) -> StateError {
    unavailable(format!("{}: {}", context.into(), err))
}
