//! In-memory store.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use quiver_crypto::IdentityKeyPair;

use super::{ProtocolStore, StoreError};
use crate::{
    address::{DistributionId, ProtocolAddress},
    group::SenderKeyRecord,
    handshake::{PreKeyRecord, SignedPreKeyRecord},
    session::SessionRecord,
};

/// In-memory store for tests and simulation.
///
/// Sessions and sender keys are kept as CBOR bytes, so every load runs the
/// same decode path a persistent store would. All state is wrapped in
/// `Arc<Mutex<>>`; clones share it. A poisoned mutex surfaces as
/// `StoreError::LockPoisoned`.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

struct MemoryStoreInner {
    identity: IdentityKeyPair,
    registration_id: u32,
    sessions: HashMap<ProtocolAddress, Vec<u8>>,
    pre_keys: HashMap<u32, PreKeyRecord>,
    signed_pre_keys: HashMap<u32, SignedPreKeyRecord>,
    sender_keys: HashMap<(ProtocolAddress, DistributionId), Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store for the given identity.
    pub fn new(identity: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStoreInner {
                identity,
                registration_id,
                sessions: HashMap::new(),
                pre_keys: HashMap::new(),
                signed_pre_keys: HashMap::new(),
                sender_keys: HashMap::new(),
            })),
        }
    }

    /// Raw stored session bytes, for checking that failed operations left
    /// storage untouched.
    pub fn raw_session(&self, address: &ProtocolAddress) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.sessions.get(address).cloned())
    }

    /// Raw stored sender-key bytes.
    pub fn raw_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.sender_keys.get(&(sender.clone(), distribution_id)).cloned())
    }

    /// Number of unused one-time pre-keys.
    pub fn pre_key_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.pre_keys.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ProtocolStore for MemoryStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair, StoreError> {
        Ok(self.lock()?.identity.clone())
    }

    fn local_registration_id(&self) -> Result<u32, StoreError> {
        Ok(self.lock()?.registration_id)
    }

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError> {
        let inner = self.lock()?;
        inner
            .sessions
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes.as_slice()))
            .transpose()
    }

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let bytes = record.serialize()?;
        self.lock()?.sessions.insert(address.clone(), bytes);
        Ok(())
    }

    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError> {
        Ok(self.lock()?.pre_keys.get(&id).cloned())
    }

    fn take_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError> {
        Ok(self.lock()?.pre_keys.remove(&id))
    }

    fn store_pre_key(&self, id: u32, record: &PreKeyRecord) -> Result<(), StoreError> {
        self.lock()?.pre_keys.insert(id, record.clone());
        Ok(())
    }

    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError> {
        Ok(self.lock()?.signed_pre_keys.get(&id).cloned())
    }

    fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<(), StoreError> {
        self.lock()?.signed_pre_keys.insert(id, record.clone());
        Ok(())
    }

    fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError> {
        let inner = self.lock()?;
        inner
            .sender_keys
            .get(&(sender.clone(), distribution_id))
            .map(|bytes| SenderKeyRecord::deserialize(bytes.as_slice()))
            .transpose()
    }

    fn store_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError> {
        let bytes = record.serialize()?;
        self.lock()?.sender_keys.insert((sender.clone(), distribution_id), bytes);
        Ok(())
    }
}
