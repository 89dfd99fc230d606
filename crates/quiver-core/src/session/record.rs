//! Everything stored for one peer: the current session plus archived ones.
//!
//! A peer that re-runs X3DH (new base key) replaces the current state, but
//! messages already in flight under the old state must still decrypt, so
//! replaced states are kept for a while.

use std::collections::VecDeque;

use quiver_crypto::PublicKey;
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::{config::SessionConfig, error::SessionError, protocol::SignalMessage, store::StoreError};

/// Session record for one peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRecord {
    current: Option<SessionState>,
    previous: VecDeque<SessionState>,
}

impl SessionRecord {
    /// Record holding a single fresh session.
    pub fn new(state: SessionState) -> Self {
        Self { current: Some(state), previous: VecDeque::new() }
    }

    /// Current session, if any.
    pub fn session_state(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    /// Mutable access to the current session.
    pub fn session_state_mut(&mut self) -> Option<&mut SessionState> {
        self.current.as_mut()
    }

    /// Number of archived states.
    pub fn archived_count(&self) -> usize {
        self.previous.len()
    }

    /// Make `state` current, archiving the old current state.
    pub fn promote_state(&mut self, state: SessionState, max_archived: usize) {
        if let Some(old) = self.current.replace(state) {
            self.previous.push_front(old);
        }
        self.previous.truncate(max_archived);
    }

    /// If some state was created from the handshake with `base_key`, make it
    /// current and return true.
    pub fn promote_matching_base_key(&mut self, base_key: &PublicKey, max_archived: usize) -> bool {
        if self.current.as_ref().is_some_and(|state| state.base_key() == base_key) {
            return true;
        }
        let Some(slot) = self.previous.iter().position(|state| state.base_key() == base_key) else {
            return false;
        };
        let Some(state) = self.previous.remove(slot) else {
            return false;
        };
        self.promote_state(state, max_archived);
        true
    }

    /// Decrypt with the current state, falling back to archived states. A
    /// successful archived state becomes current.
    ///
    /// # Errors
    ///
    /// - `SessionNotInitialized` if the record is empty
    /// - the current state's error if no state can decrypt
    pub fn decrypt(
        &mut self,
        message: &SignalMessage,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let Some(current) = self.current.as_mut() else {
            return Err(SessionError::SessionNotInitialized { reason: "empty session record" });
        };

        let current_error = match current.decrypt(message, config) {
            Ok(plaintext) => return Ok(plaintext),
            Err(err) => err,
        };

        for slot in 0..self.previous.len() {
            let mut candidate = self.previous[slot].clone();
            if let Ok(plaintext) = candidate.decrypt(message, config) {
                self.previous.remove(slot);
                self.promote_state(candidate, config.max_archived_states);
                tracing::debug!(slot, "archived session state promoted");
                return Ok(plaintext);
            }
        }

        Err(current_error)
    }

    /// Encode for storage (CBOR).
    pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(out)
    }

    /// Decode a record written by [`Self::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, StoreError> {
        ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use quiver_crypto::{IdentityKeyPair, KeyPair};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::handshake::{BobParameters, initialize_bob_session};

    /// Responder state whose base key is fresh each call.
    fn state(rng: &mut ChaCha20Rng) -> SessionState {
        let ours = IdentityKeyPair::generate(rng);
        let theirs = IdentityKeyPair::generate(rng);
        let signed = KeyPair::generate(rng);
        initialize_bob_session(&BobParameters {
            our_identity_key_pair: &ours,
            our_signed_pre_key_pair: &signed,
            our_one_time_pre_key_pair: None,
            our_ratchet_key_pair: &signed,
            their_identity_key: theirs.identity_key(),
            their_base_key: KeyPair::generate(rng).public_key,
        })
        .unwrap()
    }

    #[test]
    fn promote_archives_and_bounds() {
        let mut rng = ChaCha20Rng::seed_from_u64(41);
        let mut record = SessionRecord::new(state(&mut rng));

        for _ in 0..5 {
            record.promote_state(state(&mut rng), 3);
        }
        assert_eq!(record.archived_count(), 3);
    }

    #[test]
    fn matching_base_key_is_promoted() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let old = state(&mut rng);
        let old_base = *old.base_key();

        let mut record = SessionRecord::new(old);
        record.promote_state(state(&mut rng), 40);
        assert_ne!(record.session_state().unwrap().base_key(), &old_base);

        assert!(record.promote_matching_base_key(&old_base, 40));
        assert_eq!(record.session_state().unwrap().base_key(), &old_base);
        assert_eq!(record.archived_count(), 1);

        let unknown = KeyPair::generate(&mut rng).public_key;
        assert!(!record.promote_matching_base_key(&unknown, 40));
    }

    #[test]
    fn empty_record_cannot_decrypt() {
        let mut record = SessionRecord::default();
        let message = SignalMessage::new(PublicKey::from_bytes([5u8; 32]), 0, 0, vec![0; 16]);

        assert!(matches!(
            record.decrypt(&message, &SessionConfig::default()),
            Err(SessionError::SessionNotInitialized { .. })
        ));
    }

    #[test]
    fn serialized_record_keeps_states() {
        let mut rng = ChaCha20Rng::seed_from_u64(43);
        let mut record = SessionRecord::new(state(&mut rng));
        record.promote_state(state(&mut rng), 40);

        let restored = SessionRecord::deserialize(&record.serialize().unwrap()).unwrap();
        assert_eq!(restored.archived_count(), 1);
        assert_eq!(
            restored.session_state().unwrap().root_key().as_bytes(),
            record.session_state().unwrap().root_key().as_bytes()
        );
    }
}
