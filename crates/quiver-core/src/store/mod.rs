//! Storage abstraction for identity, pre-keys, sessions and sender keys.
//!
//! The trait is synchronous. The engine loads a record, works on it, and
//! stores it back only when the whole operation succeeded; it never holds a
//! reference into the store across calls.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;
use quiver_crypto::IdentityKeyPair;

use crate::{
    address::{DistributionId, ProtocolAddress},
    group::SenderKeyRecord,
    handshake::{PreKeyRecord, SignedPreKeyRecord},
    session::SessionRecord,
};

/// Storage for everything the engine persists.
///
/// Must be Clone (the engine owns a handle), Send + Sync (thread-safe), and
/// synchronous. Implementations typically share internal state via Arc, so
/// clones access the same underlying storage.
pub trait ProtocolStore: Clone + Send + Sync + 'static {
    /// Our long-term identity.
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, StoreError>;

    /// Our registration id.
    fn local_registration_id(&self) -> Result<u32, StoreError>;

    /// Load the session record for a peer. `None` if no session exists.
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError>;

    /// Store the session record for a peer, replacing any previous one.
    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError>;

    /// Load a one-time pre-key without consuming it.
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError>;

    /// Remove and return a one-time pre-key.
    ///
    /// # Invariants
    ///
    /// - Atomic: of two concurrent calls with the same id, at most one gets
    ///   `Some`
    fn take_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError>;

    /// Store a one-time pre-key.
    fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<(), StoreError>;

    /// Load a signed pre-key.
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError>;

    /// Store a signed pre-key.
    fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<(), StoreError>;

    /// Load the sender-key record for a (sender, group).
    fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError>;

    /// Store the sender-key record for a (sender, group).
    fn store_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError>;
}
