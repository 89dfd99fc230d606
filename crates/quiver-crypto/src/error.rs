//! Error types for key material primitives

use thiserror::Error;

/// Errors from primitive cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key bytes are malformed or not a usable curve point
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: &'static str,
    },

    /// Key material had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Requested HKDF output length is not supported
    #[error("invalid output length: {requested} bytes")]
    InvalidOutputLength {
        /// Requested number of output bytes
        requested: usize,
    },

    /// AEAD tag did not verify
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Chain index would overflow
    #[error("chain index overflow at {current}")]
    CounterOverflow {
        /// Index at which overflow was detected
        current: u32,
    },
}

impl CryptoError {
    /// Returns true if the error was caused by attacker-controllable input
    /// rather than a local usage mistake.
    pub fn is_input_rejection(&self) -> bool {
        match self {
            Self::InvalidKey { .. } | Self::InvalidKeyLength { .. } => true,
            Self::AuthenticationFailed => true,
            Self::InvalidOutputLength { .. } | Self::CounterOverflow { .. } => false,
        }
    }
}
