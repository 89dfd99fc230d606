//! Sender chain state and the per-sender record of chains.

use std::collections::VecDeque;

use quiver_crypto::{ChainKey, KEY_SIZE, MessageKeys, SigningKeyPair, VerificationKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::MAX_SENDER_KEY_STATES;
use crate::{
    address::DistributionId,
    config::SenderKeyConfig,
    error::SessionError,
    protocol::{SenderKeyDistributionMessage, SenderKeyMessage},
    skipped::SkippedKeys,
    store::StoreError,
};

/// One sender chain: keys, the sender's signing key, and skipped keys.
#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    chain_id: u32,
    chain_key: ChainKey,
    signing_key: VerificationKey,
    signing_private: Option<SigningKeyPair>,
    skipped: SkippedKeys<u32>,
}

impl SenderKeyState {
    /// Fresh local sender state: random chain id, seed and signing key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let chain_id = rng.next_u32() >> 1;
        let mut seed = [0u8; KEY_SIZE];
        rng.fill_bytes(&mut seed);
        let signing = SigningKeyPair::generate(rng);

        Self {
            chain_id,
            chain_key: ChainKey::new(seed, 0),
            signing_key: signing.verification_key(),
            signing_private: Some(signing),
            skipped: SkippedKeys::new(),
        }
    }

    /// Remote sender state installed from a distribution message.
    pub fn from_distribution(message: &SenderKeyDistributionMessage) -> Self {
        Self {
            chain_id: message.chain_id(),
            chain_key: ChainKey::new(*message.chain_key(), message.iteration()),
            signing_key: *message.signing_key(),
            signing_private: None,
            skipped: SkippedKeys::new(),
        }
    }

    /// Chain id.
    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// Next iteration this chain will produce.
    pub fn iteration(&self) -> u32 {
        self.chain_key.index()
    }

    /// Key that verifies this sender's signatures.
    pub fn signing_key(&self) -> &VerificationKey {
        &self.signing_key
    }

    /// True if we are the sender on this chain.
    pub fn is_local(&self) -> bool {
        self.signing_private.is_some()
    }

    /// Distribution message letting others decrypt from the current
    /// iteration on.
    pub fn distribution_message(&self, distribution_id: DistributionId) -> SenderKeyDistributionMessage {
        SenderKeyDistributionMessage::new(
            distribution_id,
            self.chain_id,
            self.chain_key.index(),
            *self.chain_key.key(),
            self.signing_key,
        )
    }

    /// Encrypt and sign a group message.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` if this is a remote sender's state
    /// - `CounterOverflow` if the chain is exhausted
    /// - `InvalidMessage` if the ciphertext is too long to encode
    pub fn encrypt(
        &mut self,
        distribution_id: DistributionId,
        plaintext: &[u8],
    ) -> Result<SenderKeyMessage, SessionError> {
        let Some(signing) = &self.signing_private else {
            return Err(SessionError::InvalidKey {
                reason: "sender key state has no signing key".to_string(),
            });
        };

        let mut chain_key = self.chain_key.clone();
        let iteration = chain_key.index();
        let message_keys = chain_key.advance()?;
        let associated_data = associated_data(distribution_id, self.chain_id, iteration);
        let ciphertext = message_keys.encrypt(plaintext, &associated_data);

        let message = SenderKeyMessage::new_signed(
            distribution_id,
            self.chain_id,
            iteration,
            ciphertext,
            signing,
        )?;
        self.chain_key = chain_key;
        Ok(message)
    }

    /// Decrypt a group message whose signature has already been checked.
    /// Commits only on success.
    ///
    /// # Errors
    ///
    /// - `DuplicateOrOldMessage` if the key was already used or evicted
    /// - `TooManySkippedMessages` if the iteration is too far ahead
    /// - `AuthenticationFailed` if the ciphertext was altered
    pub fn decrypt(
        &mut self,
        message: &SenderKeyMessage,
        config: &SenderKeyConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let mut working = self.clone();
        let message_keys = working.message_keys_for(message.iteration(), config)?;
        let associated_data =
            associated_data(message.distribution_id(), message.chain_id(), message.iteration());
        let plaintext = message_keys.decrypt(message.ciphertext(), &associated_data)?;
        *self = working;
        Ok(plaintext)
    }

    fn message_keys_for(
        &mut self,
        iteration: u32,
        config: &SenderKeyConfig,
    ) -> Result<MessageKeys, SessionError> {
        let current = self.chain_key.index();

        if iteration < current {
            return self.skipped.take(&iteration).ok_or_else(|| {
                tracing::warn!(iteration, current, "rejecting duplicate or old group message");
                SessionError::DuplicateOrOldMessage { index: iteration, current }
            });
        }

        if iteration - current > config.max_forward_jumps {
            tracing::warn!(iteration, current, limit = config.max_forward_jumps, "group skip bound exceeded");
            return Err(SessionError::TooManySkippedMessages {
                current,
                received: iteration,
                limit: config.max_forward_jumps,
            });
        }

        while self.chain_key.index() < iteration {
            let index = self.chain_key.index();
            let keys = self.chain_key.advance()?;
            self.skipped.insert(index, keys, config.max_message_keys);
        }
        Ok(self.chain_key.advance()?)
    }
}

fn associated_data(distribution_id: DistributionId, chain_id: u32, iteration: u32) -> [u8; 24] {
    let mut out = [0u8; 24];
    out[..16].copy_from_slice(&distribution_id.to_be_bytes());
    out[16..20].copy_from_slice(&chain_id.to_be_bytes());
    out[20..].copy_from_slice(&iteration.to_be_bytes());
    out
}

impl std::fmt::Debug for SenderKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderKeyState")
            .field("chain_id", &self.chain_id)
            .field("iteration", &self.chain_key.index())
            .field("signing_key", &self.signing_key)
            .field("local", &self.is_local())
            .finish_non_exhaustive()
    }
}

/// Sender-key states for one (group, sender), newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    /// Newest state.
    pub fn current(&self) -> Option<&SenderKeyState> {
        self.states.front()
    }

    /// Mutable newest state.
    pub fn current_mut(&mut self) -> Option<&mut SenderKeyState> {
        self.states.front_mut()
    }

    /// State for a given chain id.
    pub fn state_for_chain_id(&mut self, chain_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|state| state.chain_id == chain_id)
    }

    /// Number of states held.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if no state is held.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Install `state` as newest, replacing any state with the same chain id
    /// and dropping the oldest beyond [`MAX_SENDER_KEY_STATES`].
    pub fn add_state(&mut self, state: SenderKeyState) {
        self.states.retain(|existing| existing.chain_id != state.chain_id);
        self.states.push_front(state);
        self.states.truncate(MAX_SENDER_KEY_STATES);
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
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    const GROUP: DistributionId = 0x5157_4956_4552;

    fn pair() -> (SenderKeyState, SenderKeyState) {
        let mut rng = ChaCha20Rng::seed_from_u64(51);
        let local = SenderKeyState::generate(&mut rng);
        let remote = SenderKeyState::from_distribution(&local.distribution_message(GROUP));
        (local, remote)
    }

    #[test]
    fn remote_state_cannot_encrypt() {
        let (_, mut remote) = pair();
        assert!(matches!(remote.encrypt(GROUP, b"x"), Err(SessionError::InvalidKey { .. })));
        assert!(!remote.is_local());
    }

    #[test]
    fn skipped_iterations_decrypt_later() {
        let (mut local, mut remote) = pair();
        let config = SenderKeyConfig::default();

        let first = local.encrypt(GROUP, b"zero").unwrap();
        let second = local.encrypt(GROUP, b"one").unwrap();

        assert_eq!(remote.decrypt(&second, &config).unwrap(), b"one");
        assert_eq!(remote.decrypt(&first, &config).unwrap(), b"zero");
        assert!(matches!(
            remote.decrypt(&first, &config),
            Err(SessionError::DuplicateOrOldMessage { index: 0, .. })
        ));
    }

    #[test]
    fn failed_decrypt_leaves_state_unchanged() {
        let (mut local, mut remote) = pair();
        let config = SenderKeyConfig::default();

        let _ = local.encrypt(GROUP, b"zero").unwrap();
        let message = local.encrypt(GROUP, b"one").unwrap();
        let forged = SenderKeyMessage::deserialize(&{
            let mut bytes = message.serialize();
            bytes[1 + 16 + 4 + 4 + 4] ^= 0x01;
            bytes
        })
        .unwrap();

        assert_eq!(remote.decrypt(&forged, &config), Err(SessionError::AuthenticationFailed));
        assert_eq!(remote.iteration(), 0);
        assert_eq!(remote.decrypt(&message, &config).unwrap(), b"one");
    }

    #[test]
    fn record_keeps_bounded_states() {
        let mut rng = ChaCha20Rng::seed_from_u64(52);
        let mut record = SenderKeyRecord::default();
        for _ in 0..MAX_SENDER_KEY_STATES + 2 {
            record.add_state(SenderKeyState::generate(&mut rng));
        }
        assert_eq!(record.len(), MAX_SENDER_KEY_STATES);
    }
}
