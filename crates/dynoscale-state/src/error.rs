//! Error types for the shared record store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state store: {0}")]
    Open(String),

    /// A redb transaction or table could not be opened or committed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("record read failed: {0}")]
    Read(String),

    #[error("record write failed: {0}")]
    Write(String),

    /// A stored record is not a JSON map of field names to scalars.
    #[error("malformed record: {0}")]
    Codec(String),

    /// The blocking task running a store operation panicked or was cancelled.
    #[error("store task failed: {0}")]
    Blocking(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
