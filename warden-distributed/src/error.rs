//! Distributed lock errors.

use thiserror::Error;

/// Result type for lease operations.
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Distributed lock errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lease store error: {0}")]
    Store(String),

    #[error("Lock timeout")]
    Timeout,

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Connection error: {0}")]
    Connection(#[from] warden_redis::RedisError),

    #[error("Lock not held")]
    NotHeld,
}
