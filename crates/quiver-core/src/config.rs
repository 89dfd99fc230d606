//! Engine configuration.
//!
//! Bounds on how far a receiver will ratchet ahead and how many message keys
//! it will hold for out-of-order delivery. Generous bounds admit memory
//! exhaustion by a hostile sender; tight ones drop legitimately delayed
//! messages.

/// Pairwise session limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest index gap a single message may skip over in one chain
    pub max_forward_jumps: u32,
    /// Maximum skipped message keys held per session; oldest evicted first
    pub max_message_keys: usize,
    /// Maximum receiving chains kept per session; oldest evicted first
    pub max_receiver_chains: usize,
    /// Maximum archived session states kept per peer
    pub max_archived_states: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_forward_jumps: 2_000,
            max_message_keys: 500,
            max_receiver_chains: 5,
            max_archived_states: 40,
        }
    }
}

/// Group sender-key limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderKeyConfig {
    /// Largest iteration gap a single message may skip over
    pub max_forward_jumps: u32,
    /// Maximum skipped message keys held per sender-key state
    pub max_message_keys: usize,
}

impl Default for SenderKeyConfig {
    fn default() -> Self {
        Self { max_forward_jumps: 2_000, max_message_keys: 500 }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pairwise session limits
    pub session: SessionConfig,
    /// Group sender-key limits
    pub sender_key: SenderKeyConfig,
}
