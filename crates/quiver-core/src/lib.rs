//! Quiver Session Engine
//!
//! End-to-end encrypted sessions built from the primitives in
//! `quiver_crypto`: the X3DH handshake, the Double Ratchet, and group sender
//! keys.
//!
//! # Architecture
//!
//! ```text
//! PreKeyBundle ──► X3DH ──► SessionState ──► SignalMessage / PreKeySignalMessage
//!                               │
//!                     root KDF on every DH ratchet step
//!                               │
//!                     chain ratchet per message
//!
//! SenderKeyState ──► SenderKeyMessage (signed)
//! ```
//!
//! [`ProtocolEngine`] is the entry point. It owns a [`ProtocolStore`] handle
//! and serializes work per session; each call is a single
//! load-modify-store transaction.
//!
//! # Security
//!
//! Forward Secrecy:
//! - Message keys are used once and zeroized; chain keys only move forward
//!
//! Post-Compromise Security:
//! - Each reply carries a fresh ratchet key, mixing new DH output into the
//!   root key
//!
//! Robustness:
//! - A rejected message (forged, replayed, too far ahead) leaves stored state
//!   untouched

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod handshake;
pub mod protocol;
pub mod session;
mod skipped;
pub mod store;

pub use address::{DistributionId, ProtocolAddress};
pub use config::{EngineConfig, SenderKeyConfig, SessionConfig};
pub use engine::ProtocolEngine;
pub use error::SessionError;
pub use group::{MAX_SENDER_KEY_STATES, SenderKeyRecord, SenderKeyState};
pub use handshake::{
    AliceParameters, BobParameters, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord,
    initialize_alice_session, initialize_bob_session, process_pre_key_bundle,
};
pub use protocol::{
    CiphertextMessage, PreKeySignalMessage, SenderKeyDistributionMessage, SenderKeyMessage,
    SignalMessage,
};
pub use session::{PendingPreKey, SessionRecord, SessionState};
pub use store::{MemoryStore, ProtocolStore, StoreError};
