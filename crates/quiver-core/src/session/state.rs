//! Per-peer Double Ratchet state.
//!
//! # Invariants
//!
//! - Chain indices never decrease
//! - A message key is handed out at most once: either straight from a chain
//!   as it advances, or taken out of the skipped cache
//! - `decrypt` and `encrypt` work on a copy and commit it only on success, so
//!   a rejected message leaves the state exactly as it was

use quiver_crypto::{ChainKey, IdentityKey, KeyPair, MessageKeys, PublicKey, RootKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{
    config::SessionConfig,
    error::SessionError,
    protocol::{SignalMessage, encode_header},
    skipped::SkippedKeys,
};

/// Chain position in the skipped cache: remote ratchet key plus index
type SkippedPosition = (PublicKey, u32);

/// X3DH parameters the initiator repeats in every message until the
/// responder answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    /// One-time pre-key used, if any
    pub pre_key_id: Option<u32>,
    /// Signed pre-key used
    pub signed_pre_key_id: u32,
    /// Initiator's base key
    pub base_key: PublicKey,
}

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct ReceiverChain {
    pub(crate) ratchet_key: PublicKey,
    pub(crate) chain_key: ChainKey,
}

/// How an incoming message reaches its key. Decided once per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceivePath {
    /// Key was cached when a later message skipped past it
    Skipped,
    /// Message continues a receiving chain we already hold
    Existing(usize),
    /// Sender has turned the DH ratchet
    NewRatchet,
}

/// Double Ratchet session with one peer.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub(crate) local_identity: IdentityKey,
    pub(crate) remote_identity: IdentityKey,
    pub(crate) local_registration_id: u32,
    pub(crate) remote_registration_id: u32,
    pub(crate) root_key: RootKey,
    pub(crate) ratchet_key_pair: KeyPair,
    pub(crate) remote_ratchet_key: Option<PublicKey>,
    pub(crate) sending_chain: Option<ChainKey>,
    pub(crate) receiver_chains: Vec<ReceiverChain>,
    pub(crate) skipped: SkippedKeys<SkippedPosition>,
    pub(crate) previous_counter: u32,
    pub(crate) base_key: PublicKey,
    pub(crate) pending_pre_key: Option<PendingPreKey>,
}

impl SessionState {
    /// Our identity key.
    pub fn local_identity(&self) -> &IdentityKey {
        &self.local_identity
    }

    /// Peer's identity key.
    pub fn remote_identity(&self) -> &IdentityKey {
        &self.remote_identity
    }

    /// Our registration id.
    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    /// Peer's registration id.
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    /// Current root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Initiator's X3DH base key; identifies the handshake that created this
    /// state.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// Handshake parameters still to be repeated, if the peer has not
    /// answered yet.
    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    /// Number of cached skipped message keys.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    pub(crate) fn set_registration_ids(&mut self, local: u32, remote: u32) {
        self.local_registration_id = local;
        self.remote_registration_id = remote;
    }

    pub(crate) fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    /// Encrypt one message.
    ///
    /// If a receive retired our sending chain, this first completes the DH
    /// ratchet with a fresh key pair from `rng`.
    ///
    /// # Errors
    ///
    /// - `SessionNotInitialized` if there is neither a sending chain nor a
    ///   remote ratchet key to build one from
    /// - `CounterOverflow` if the sending chain is exhausted
    pub fn encrypt<R: RngCore + CryptoRng>(
        &mut self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<SignalMessage, SessionError> {
        let mut working = self.clone();
        let message = working.encrypt_in_place(plaintext, rng)?;
        *self = working;
        Ok(message)
    }

    fn encrypt_in_place<R: RngCore + CryptoRng>(
        &mut self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<SignalMessage, SessionError> {
        let mut sending_chain = match self.sending_chain.take() {
            Some(chain) => chain,
            None => self.step_sending_ratchet(rng)?,
        };

        let counter = sending_chain.index();
        let message_keys = sending_chain.advance()?;
        self.sending_chain = Some(sending_chain);

        let ratchet_key = self.ratchet_key_pair.public_key;
        let header = encode_header(&ratchet_key, counter, self.previous_counter);
        let associated_data =
            associated_data(&self.local_identity, &self.remote_identity, &header);
        let ciphertext = message_keys.encrypt(plaintext, &associated_data);

        Ok(SignalMessage::new(ratchet_key, counter, self.previous_counter, ciphertext))
    }

    /// Sending half of a DH ratchet step, deferred until we have something to
    /// send.
    fn step_sending_ratchet<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ChainKey, SessionError> {
        let remote = self
            .remote_ratchet_key
            .ok_or(SessionError::SessionNotInitialized { reason: "no remote ratchet key" })?;

        let our_new = KeyPair::generate(rng);
        let (root_key, sending_chain) = self.root_key.create_chain(&remote, &our_new.private_key)?;
        self.root_key = root_key;
        self.ratchet_key_pair = our_new;

        tracing::debug!(previous_counter = self.previous_counter, "sending ratchet step");

        Ok(sending_chain)
    }

    /// Decrypt one message.
    ///
    /// # Errors
    ///
    /// - `DuplicateOrOldMessage` if the key was already used or evicted
    /// - `TooManySkippedMessages` if the message is too far ahead of its chain
    /// - `AuthenticationFailed` if the ciphertext or header was altered
    /// - `InvalidKey` if the message carries a low-order ratchet key
    pub fn decrypt(
        &mut self,
        message: &SignalMessage,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let mut working = self.clone();
        let plaintext = working.decrypt_in_place(message, config)?;
        *self = working;
        Ok(plaintext)
    }

    fn decrypt_in_place(
        &mut self,
        message: &SignalMessage,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, SessionError> {
        let ratchet_key = *message.ratchet_key();
        let counter = message.counter();

        let message_keys = match self.receive_path(&ratchet_key, counter) {
            ReceivePath::Skipped => self
                .skipped
                .take(&(ratchet_key, counter))
                .ok_or(SessionError::DuplicateOrOldMessage { index: counter, current: counter })?,
            ReceivePath::Existing(slot) => self.chain_message_keys(slot, counter, config)?,
            ReceivePath::NewRatchet => {
                self.drain_current_chain(message.previous_counter(), config)?;
                let slot = self.step_receiving_ratchet(ratchet_key, config)?;
                self.chain_message_keys(slot, counter, config)?
            },
        };

        let associated_data = associated_data(
            &self.remote_identity,
            &self.local_identity,
            &message.header_bytes(),
        );
        let plaintext = message_keys.decrypt(message.ciphertext(), &associated_data)?;

        // Any authenticated reply means the peer has our handshake.
        self.pending_pre_key = None;

        Ok(plaintext)
    }

    fn receive_path(&self, ratchet_key: &PublicKey, counter: u32) -> ReceivePath {
        if self.skipped.contains(&(*ratchet_key, counter)) {
            return ReceivePath::Skipped;
        }
        match self.receiver_chains.iter().position(|chain| chain.ratchet_key == *ratchet_key) {
            Some(slot) => ReceivePath::Existing(slot),
            None => ReceivePath::NewRatchet,
        }
    }

    /// Advance receiving chain `slot` to `counter`, caching every key skipped
    /// on the way, and return the key for `counter`.
    fn chain_message_keys(
        &mut self,
        slot: usize,
        counter: u32,
        config: &SessionConfig,
    ) -> Result<MessageKeys, SessionError> {
        let ReceiverChain { ratchet_key, chain_key } = &mut self.receiver_chains[slot];
        let current = chain_key.index();

        if counter < current {
            tracing::warn!(counter, current, "rejecting duplicate or old message");
            return Err(SessionError::DuplicateOrOldMessage { index: counter, current });
        }

        skip_to(chain_key, *ratchet_key, counter, &mut self.skipped, config)?;
        Ok(chain_key.advance()?)
    }

    /// Cache the rest of the current receiving chain up to the length the
    /// sender reports for it, before the ratchet moves on.
    fn drain_current_chain(
        &mut self,
        previous_counter: u32,
        config: &SessionConfig,
    ) -> Result<(), SessionError> {
        let Some(remote) = self.remote_ratchet_key else {
            return Ok(());
        };
        let Some(chain) = self.receiver_chains.iter_mut().find(|chain| chain.ratchet_key == remote)
        else {
            return Ok(());
        };

        if chain.chain_key.index() >= previous_counter {
            return Ok(());
        }
        skip_to(&mut chain.chain_key, remote, previous_counter, &mut self.skipped, config)
    }

    /// Receiving half of a DH ratchet step. Retires the sending chain; the
    /// sending half runs on the next encrypt.
    fn step_receiving_ratchet(
        &mut self,
        their_ratchet_key: PublicKey,
        config: &SessionConfig,
    ) -> Result<usize, SessionError> {
        let (root_key, chain_key) =
            self.root_key.create_chain(&their_ratchet_key, &self.ratchet_key_pair.private_key)?;
        self.root_key = root_key;

        self.receiver_chains.push(ReceiverChain { ratchet_key: their_ratchet_key, chain_key });
        while self.receiver_chains.len() > config.max_receiver_chains.max(1) {
            self.receiver_chains.remove(0);
        }

        self.remote_ratchet_key = Some(their_ratchet_key);
        if let Some(retired) = self.sending_chain.take() {
            self.previous_counter = retired.index();
        }

        tracing::debug!(
            receiver_chains = self.receiver_chains.len(),
            previous_counter = self.previous_counter,
            "receiving ratchet step"
        );

        Ok(self.receiver_chains.len() - 1)
    }
}

/// Advance `chain_key` until its index is `target`, caching each key.
fn skip_to(
    chain_key: &mut ChainKey,
    ratchet_key: PublicKey,
    target: u32,
    skipped: &mut SkippedKeys<SkippedPosition>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let current = chain_key.index();
    if target.saturating_sub(current) > config.max_forward_jumps {
        tracing::warn!(current, target, limit = config.max_forward_jumps, "skip bound exceeded");
        return Err(SessionError::TooManySkippedMessages {
            current,
            received: target,
            limit: config.max_forward_jumps,
        });
    }

    while chain_key.index() < target {
        let index = chain_key.index();
        let keys = chain_key.advance()?;
        skipped.insert((ratchet_key, index), keys, config.max_message_keys);
    }
    Ok(())
}

/// `sender identity || receiver identity || header`
fn associated_data(sender: &IdentityKey, receiver: &IdentityKey, header: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * quiver_crypto::IDENTITY_KEY_SIZE + header.len());
    out.extend_from_slice(&sender.serialize());
    out.extend_from_slice(&receiver.serialize());
    out.extend_from_slice(header);
    out
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("remote_identity", &self.remote_identity)
            .field("ratchet_key", &self.ratchet_key_pair.public_key)
            .field("remote_ratchet_key", &self.remote_ratchet_key)
            .field("sending_index", &self.sending_chain.as_ref().map(ChainKey::index))
            .field("receiver_chains", &self.receiver_chains.len())
            .field("skipped", &self.skipped.len())
            .field("previous_counter", &self.previous_counter)
            .finish_non_exhaustive()
    }
}
