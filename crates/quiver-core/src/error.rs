//! Error types for the Quiver session engine.
//!
//! A single `SessionError` covers the handshake, pairwise ratchet, and group
//! ratchet. `is_fatal` separates errors that abort a handshake (the session
//! cannot be established with this input) from per-message rejections where
//! the session itself stays usable.

use quiver_crypto::CryptoError;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while establishing or using a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Key bytes are malformed, wrong length, or a low-order point
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// Signed pre-key or sender-key message signature did not verify
    #[error("invalid signature on {context}")]
    InvalidSignature {
        /// What carried the bad signature
        context: &'static str,
    },

    /// One-time pre-key is not in the store (unknown or already consumed)
    #[error("unknown one-time pre-key {pre_key_id}")]
    UnknownPreKey {
        /// Referenced pre-key id
        pre_key_id: u32,
    },

    /// Signed pre-key is not in the store
    #[error("unknown signed pre-key {signed_pre_key_id}")]
    UnknownSignedPreKey {
        /// Referenced signed pre-key id
        signed_pre_key_id: u32,
    },

    /// No usable session exists for the peer
    #[error("session not initialized: {reason}")]
    SessionNotInitialized {
        /// What is missing
        reason: &'static str,
    },

    /// Message index is further ahead than the configured skip bound
    #[error("too many skipped messages: at {current}, received {received} (limit {limit})")]
    TooManySkippedMessages {
        /// Next index the chain expected
        current: u32,
        /// Index carried by the message
        received: u32,
        /// Configured maximum forward jump
        limit: u32,
    },

    /// Message key was already used or fell out of the cache
    #[error("duplicate or old message: index {index}, chain at {current}")]
    DuplicateOrOldMessage {
        /// Index carried by the message
        index: u32,
        /// Next index the chain expected
        current: u32,
    },

    /// AEAD tag did not verify
    #[error("message authentication failed")]
    AuthenticationFailed,

    /// Envelope could not be parsed
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong with the envelope
        reason: &'static str,
    },

    /// No sender-key state for this sender and distribution
    #[error("no sender key state for distribution {distribution_id:#x}")]
    NoSenderKeyState {
        /// Group distribution id
        distribution_id: u128,
    },

    /// Chain index would overflow
    #[error("chain index overflow at {current}")]
    CounterOverflow {
        /// Index at which overflow was detected
        current: u32,
    },

    /// A per-session lock was poisoned by a panicking thread
    #[error("session lock poisoned")]
    LockPoisoned,

    /// Underlying store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Returns true if this error aborts session establishment.
    ///
    /// Fatal errors mean the handshake input (bundle or pre-key message) can
    /// never succeed as given, or local state is unusable. Non-fatal errors
    /// reject a single message and leave the session intact.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. }
                | Self::InvalidSignature { .. }
                | Self::UnknownPreKey { .. }
                | Self::UnknownSignedPreKey { .. }
                | Self::LockPoisoned
                | Self::Store(_)
        )
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey { reason } => Self::InvalidKey { reason: reason.to_string() },
            CryptoError::InvalidKeyLength { .. } | CryptoError::InvalidOutputLength { .. } => {
                Self::InvalidKey { reason: err.to_string() }
            },
            CryptoError::AuthenticationFailed => Self::AuthenticationFailed,
            CryptoError::CounterOverflow { current } => Self::CounterOverflow { current },
        }
    }
}
