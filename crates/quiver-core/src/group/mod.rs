//! Group sender-key ratchet.
//!
//! Each member encrypts group traffic under its own sender chain and signs
//! every message. Other members learn the chain from a
//! [`SenderKeyDistributionMessage`](crate::protocol::SenderKeyDistributionMessage)
//! delivered over pairwise sessions.
//!
//! # Security
//!
//! - Forward secrecy within a chain: message keys come from the chain
//!   ratchet and are consumed once
//! - Sender authentication: group members share chain keys, so only the
//!   Ed25519 signature proves who sent a message
//! - No post-compromise security: a leaked chain key exposes every later
//!   message until the sender rotates to a new chain

mod state;

pub use state::{SenderKeyRecord, SenderKeyState};

/// Sender-key states kept per (group, sender)
pub const MAX_SENDER_KEY_STATES: usize = 5;
