//! Engine entry points.
//!
//! `ProtocolEngine` ties the handshake, session ratchet and sender-key
//! ratchet to a [`ProtocolStore`]. Every operation is one transaction:
//!
//! 1. Take the per-session lock
//! 2. Load the record
//! 3. Run the state machine on it
//! 4. Store the record back, only if every step succeeded
//!
//! A rejected message therefore never changes what is stored.

mod locks;

use rand::{CryptoRng, RngCore};

use self::locks::{LockKey, LockTable};
use crate::{
    address::{DistributionId, ProtocolAddress},
    config::EngineConfig,
    error::SessionError,
    group::{SenderKeyRecord, SenderKeyState},
    handshake::{BobParameters, PreKeyBundle, initialize_bob_session, process_pre_key_bundle},
    protocol::{
        CiphertextMessage, PreKeySignalMessage, SenderKeyDistributionMessage, SenderKeyMessage,
        SignalMessage,
    },
    session::SessionRecord,
    store::ProtocolStore,
};

/// Session engine over a store.
pub struct ProtocolEngine<S: ProtocolStore> {
    store: S,
    config: EngineConfig,
    locks: LockTable,
}

impl<S: ProtocolStore> ProtocolEngine<S> {
    /// Create an engine that persists through `store`.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config, locks: LockTable::default() }
    }

    /// Store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a session with `remote` from its published bundle.
    ///
    /// Any existing session with `remote` is archived, not discarded.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` if the bundle's signed pre-key does not verify
    /// - `InvalidKey` if a bundle key is unusable
    pub fn initialize_session<R: RngCore + CryptoRng>(
        &self,
        remote: &ProtocolAddress,
        bundle: &PreKeyBundle,
        rng: &mut R,
    ) -> Result<(), SessionError> {
        self.with_lock(LockKey::Session(remote.clone()), || {
            let identity = self.store.identity_key_pair()?;
            let mut state = process_pre_key_bundle(&identity, bundle, rng)?;
            state.set_registration_ids(self.store.local_registration_id()?, bundle.registration_id);

            let mut record = self.store.load_session(remote)?.unwrap_or_default();
            record.promote_state(state, self.config.session.max_archived_states);
            self.store.store_session(remote, &record)?;

            tracing::debug!(peer = %remote, "session initialized from pre-key bundle");
            Ok(())
        })
    }

    /// Encrypt a message for `remote`.
    ///
    /// Until `remote` has answered, the result is a pre-key message carrying
    /// the handshake parameters.
    ///
    /// # Errors
    ///
    /// - `SessionNotInitialized` if there is no session with `remote`
    pub fn encrypt_message<R: RngCore + CryptoRng>(
        &self,
        remote: &ProtocolAddress,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<CiphertextMessage, SessionError> {
        self.with_lock(LockKey::Session(remote.clone()), || {
            let mut record = self
                .store
                .load_session(remote)?
                .ok_or(SessionError::SessionNotInitialized { reason: "no session record" })?;
            let state = record
                .session_state_mut()
                .ok_or(SessionError::SessionNotInitialized { reason: "empty session record" })?;

            let message = state.encrypt(plaintext, rng)?;
            let envelope = match state.pending_pre_key() {
                Some(pending) => CiphertextMessage::PreKey(PreKeySignalMessage::new(
                    state.local_registration_id(),
                    pending.pre_key_id,
                    pending.signed_pre_key_id,
                    pending.base_key,
                    *state.local_identity(),
                    message,
                )),
                None => CiphertextMessage::Signal(message),
            };

            self.store.store_session(remote, &record)?;
            Ok(envelope)
        })
    }

    /// Decrypt a message from `remote`.
    ///
    /// A pre-key message builds the responder session on first sight and
    /// consumes the one-time pre-key it names.
    ///
    /// # Errors
    ///
    /// - `UnknownSignedPreKey`, `UnknownPreKey` for pre-key messages naming
    ///   keys we do not hold (or no longer hold)
    /// - `SessionNotInitialized` for a plain message without a session
    /// - `DuplicateOrOldMessage`, `TooManySkippedMessages`,
    ///   `AuthenticationFailed` for rejected messages
    pub fn decrypt_message(
        &self,
        remote: &ProtocolAddress,
        message: &CiphertextMessage,
    ) -> Result<Vec<u8>, SessionError> {
        let result = match message {
            CiphertextMessage::Signal(message) => self.decrypt_signal(remote, message),
            CiphertextMessage::PreKey(message) => self.decrypt_pre_key(remote, message),
        };

        if let Err(err) = &result {
            tracing::warn!(peer = %remote, error = %err, "message rejected");
        }
        result
    }

    fn decrypt_signal(
        &self,
        remote: &ProtocolAddress,
        message: &SignalMessage,
    ) -> Result<Vec<u8>, SessionError> {
        self.with_lock(LockKey::Session(remote.clone()), || {
            let mut record = self
                .store
                .load_session(remote)?
                .ok_or(SessionError::SessionNotInitialized { reason: "no session record" })?;

            let plaintext = record.decrypt(message, &self.config.session)?;
            self.store.store_session(remote, &record)?;
            Ok(plaintext)
        })
    }

    fn decrypt_pre_key(
        &self,
        remote: &ProtocolAddress,
        message: &PreKeySignalMessage,
    ) -> Result<Vec<u8>, SessionError> {
        self.with_lock(LockKey::Session(remote.clone()), || {
            let max_archived = self.config.session.max_archived_states;
            let mut record = self.store.load_session(remote)?.unwrap_or_default();

            let consumed_pre_key =
                if record.promote_matching_base_key(message.base_key(), max_archived) {
                    tracing::debug!(peer = %remote, "repeat pre-key message, reusing session");
                    None
                } else {
                    self.install_responder_session(&mut record, message)?;
                    message.pre_key_id()
                };

            let plaintext = record
                .session_state_mut()
                .ok_or(SessionError::SessionNotInitialized { reason: "empty session record" })?
                .decrypt(message.message(), &self.config.session)?;

            if let Some(pre_key_id) = consumed_pre_key
                && self.store.take_pre_key(pre_key_id)?.is_none()
            {
                return Err(SessionError::UnknownPreKey { pre_key_id });
            }

            self.store.store_session(remote, &record)?;
            Ok(plaintext)
        })
    }

    /// Run the responder half of X3DH and make the result current in
    /// `record`.
    fn install_responder_session(
        &self,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<(), SessionError> {
        let signed_pre_key_id = message.signed_pre_key_id();
        let signed_pre_key = self
            .store
            .load_signed_pre_key(signed_pre_key_id)?
            .ok_or(SessionError::UnknownSignedPreKey { signed_pre_key_id })?;

        let one_time_pre_key = match message.pre_key_id() {
            Some(pre_key_id) => Some(
                self.store
                    .load_pre_key(pre_key_id)?
                    .ok_or(SessionError::UnknownPreKey { pre_key_id })?,
            ),
            None => None,
        };

        let identity = self.store.identity_key_pair()?;
        let mut state = initialize_bob_session(&BobParameters {
            our_identity_key_pair: &identity,
            our_signed_pre_key_pair: &signed_pre_key.key_pair,
            our_one_time_pre_key_pair: one_time_pre_key.as_ref().map(|record| &record.key_pair),
            our_ratchet_key_pair: &signed_pre_key.key_pair,
            their_identity_key: *message.identity_key(),
            their_base_key: *message.base_key(),
        })?;
        state.set_registration_ids(self.store.local_registration_id()?, message.registration_id());

        record.promote_state(state, self.config.session.max_archived_states);
        Ok(())
    }

    /// Root key of the current session with `remote`, for diagnostics.
    pub fn session_root_key(
        &self,
        remote: &ProtocolAddress,
    ) -> Result<Option<[u8; 32]>, SessionError> {
        let record = self.store.load_session(remote)?;
        Ok(record
            .as_ref()
            .and_then(SessionRecord::session_state)
            .map(|state| *state.root_key().as_bytes()))
    }

    /// Create our sender key for a group, or reuse the existing one, and
    /// return the distribution message for other members.
    pub fn create_sender_key_state<R: RngCore + CryptoRng>(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
        rng: &mut R,
    ) -> Result<SenderKeyDistributionMessage, SessionError> {
        self.with_lock(LockKey::SenderKey(sender.clone(), distribution_id), || {
            let mut record = self.store.load_sender_key(sender, distribution_id)?.unwrap_or_default();

            if let Some(state) = record.current().filter(|state| state.is_local()) {
                return Ok(state.distribution_message(distribution_id));
            }

            let state = SenderKeyState::generate(rng);
            let message = state.distribution_message(distribution_id);
            record.add_state(state);
            self.store.store_sender_key(sender, distribution_id, &record)?;

            tracing::debug!(%sender, distribution_id, chain_id = message.chain_id(), "sender key created");
            Ok(message)
        })
    }

    /// Install another member's sender key.
    ///
    /// Re-delivery of a chain we already hold is ignored so it cannot rewind
    /// the chain.
    pub fn process_sender_key_distribution(
        &self,
        sender: &ProtocolAddress,
        message: &SenderKeyDistributionMessage,
    ) -> Result<(), SessionError> {
        let distribution_id = message.distribution_id();
        self.with_lock(LockKey::SenderKey(sender.clone(), distribution_id), || {
            let mut record = self.store.load_sender_key(sender, distribution_id)?.unwrap_or_default();

            let known = record
                .state_for_chain_id(message.chain_id())
                .is_some_and(|state| state.signing_key() == message.signing_key());
            if known {
                tracing::debug!(%sender, chain_id = message.chain_id(), "sender key already known");
                return Ok(());
            }

            record.add_state(SenderKeyState::from_distribution(message));
            self.store.store_sender_key(sender, distribution_id, &record)?;

            tracing::debug!(%sender, distribution_id, chain_id = message.chain_id(), "sender key installed");
            Ok(())
        })
    }

    /// Encrypt a group message under our current sender key.
    ///
    /// # Errors
    ///
    /// - `NoSenderKeyState` if `create_sender_key_state` was never called
    pub fn group_encrypt(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
        plaintext: &[u8],
    ) -> Result<SenderKeyMessage, SessionError> {
        self.with_lock(LockKey::SenderKey(sender.clone(), distribution_id), || {
            let mut record = self.load_sender_key_record(sender, distribution_id)?;
            let state =
                record.current_mut().ok_or(SessionError::NoSenderKeyState { distribution_id })?;

            let message = state.encrypt(distribution_id, plaintext)?;
            self.store.store_sender_key(sender, distribution_id, &record)?;
            Ok(message)
        })
    }

    /// Verify and decrypt a group message from `sender`.
    ///
    /// # Errors
    ///
    /// - `NoSenderKeyState` if we hold no chain with the message's chain id
    /// - `InvalidSignature` if the sender's signature does not verify
    /// - `DuplicateOrOldMessage`, `TooManySkippedMessages`,
    ///   `AuthenticationFailed` for rejected messages
    pub fn group_decrypt(
        &self,
        sender: &ProtocolAddress,
        message: &SenderKeyMessage,
    ) -> Result<Vec<u8>, SessionError> {
        let distribution_id = message.distribution_id();
        self.with_lock(LockKey::SenderKey(sender.clone(), distribution_id), || {
            let mut record = self.load_sender_key_record(sender, distribution_id)?;
            let state = record
                .state_for_chain_id(message.chain_id())
                .ok_or(SessionError::NoSenderKeyState { distribution_id })?;

            if !message.verify_signature(state.signing_key()) {
                tracing::warn!(%sender, distribution_id, "group message signature rejected");
                return Err(SessionError::InvalidSignature { context: "sender key message" });
            }

            let plaintext = state.decrypt(message, &self.config.sender_key)?;
            self.store.store_sender_key(sender, distribution_id, &record)?;
            Ok(plaintext)
        })
    }

    fn load_sender_key_record(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<SenderKeyRecord, SessionError> {
        self.store
            .load_sender_key(sender, distribution_id)?
            .ok_or(SessionError::NoSenderKeyState { distribution_id })
    }

    fn with_lock<T>(
        &self,
        key: LockKey,
        operation: impl FnOnce() -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        self.locks.with_lock(key, operation)
    }
}
