//! Session error types.

use thiserror::Error;

/// Errors raised while loading, persisting or destroying a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing store could not be reached or rejected the command.
    #[error("session store error: {0}")]
    Store(String),

    /// A stored session could not be encoded or decoded.
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cookie signing key could not be initialized.
    #[error("invalid session secret: {0}")]
    InvalidSecret(String),
}

impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for SessionError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Store(err.to_string())
    }
}
