//! Pre-key material: what the responder publishes and what it keeps.

use quiver_crypto::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Public material an initiator fetches to start a session offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Responder's registration id
    pub registration_id: u32,
    /// Responder's device id
    pub device_id: u32,
    /// One-time pre-key `(id, public key)`, if one was available
    pub pre_key: Option<(u32, PublicKey)>,
    /// Signed pre-key id
    pub signed_pre_key_id: u32,
    /// Signed pre-key public half
    pub signed_pre_key: PublicKey,
    /// Identity signature over the signed pre-key
    pub signed_pre_key_signature: Vec<u8>,
    /// Responder's identity key
    pub identity_key: IdentityKey,
}

impl PreKeyBundle {
    /// Assemble a bundle from the responder's own records.
    pub fn from_records(
        registration_id: u32,
        device_id: u32,
        identity_key: IdentityKey,
        signed_pre_key: &SignedPreKeyRecord,
        pre_key: Option<&PreKeyRecord>,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key: pre_key.map(|record| (record.id, record.key_pair.public_key)),
            signed_pre_key_id: signed_pre_key.id,
            signed_pre_key: signed_pre_key.key_pair.public_key,
            signed_pre_key_signature: signed_pre_key.signature.clone(),
            identity_key,
        }
    }

    /// Check the identity signature on the signed pre-key.
    pub fn verify_signature(&self) -> bool {
        self.identity_key.verify(self.signed_pre_key.as_bytes(), &self.signed_pre_key_signature)
    }
}

/// One-time pre-key kept by the responder until first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    /// Pre-key id
    pub id: u32,
    /// Key pair
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    /// Generate a fresh one-time pre-key.
    pub fn generate<R: RngCore + CryptoRng>(id: u32, rng: &mut R) -> Self {
        Self { id, key_pair: KeyPair::generate(rng) }
    }
}

/// Medium-term signed pre-key kept by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    /// Signed pre-key id
    pub id: u32,
    /// Key pair
    pub key_pair: KeyPair,
    /// Identity signature over the public key
    pub signature: Vec<u8>,
    /// Creation time (seconds since the Unix epoch)
    pub timestamp: u64,
}

impl SignedPreKeyRecord {
    /// Generate and sign a fresh signed pre-key.
    pub fn generate<R: RngCore + CryptoRng>(
        id: u32,
        identity: &IdentityKeyPair,
        timestamp: u64,
        rng: &mut R,
    ) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity.sign(key_pair.public_key.as_bytes()).to_vec();
        Self { id, key_pair, signature, timestamp }
    }
}
