//! Store error types.
//!
//! - `Serialization`: a record could not be encoded or decoded
//! - `LockPoisoned`: an in-memory store's mutex was poisoned

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A thread panicked while holding the store lock
    #[error("store lock poisoned")]
    LockPoisoned,
}
