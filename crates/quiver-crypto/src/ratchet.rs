//! Chain ratchet and root-key derivation
//!
//! # Security Properties
//!
//! - Forward Secrecy: a chain key only moves forward; HMAC is one-way, so a
//!   later chain key reveals nothing about earlier ones
//! - Key Uniqueness: each index yields its own message key and nonce
//! - Determinism: the same chain key always yields the same sequence
//!
//! ```text
//!        ChainKey[n]
//!         │      │
//! HMAC(·,0x01)  HMAC(·,0x02)
//!         │      │
//!         ▼      ▼
//!   MessageKeys[n]  ChainKey[n+1]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    aead::{NONCE_SIZE, aead_decrypt, aead_encrypt},
    error::CryptoError,
    kdf::{derive_array, hmac_sha256},
    keys::{PrivateKey, PublicKey, diffie_hellman},
};

/// HMAC input for the message-key seed
const MESSAGE_KEY_SEED: &[u8] = &[0x01];

/// HMAC input for the next chain key
const CHAIN_KEY_SEED: &[u8] = &[0x02];

/// HKDF info expanding a message-key seed into cipher key and nonce
const MESSAGE_KEYS_INFO: &[u8] = b"QuiverMessageKeys";

/// HKDF info for the root-key KDF
const ROOT_CHAIN_INFO: &[u8] = b"QuiverRatchet";

/// Cipher key plus nonce
const MESSAGE_KEYS_LEN: usize = 32 + NONCE_SIZE;

/// Key material for exactly one message.
///
/// Produced by [`ChainKey::message_keys`]; used once for encryption or
/// decryption and then dropped (zeroized).
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    index: u32,
}

impl MessageKeys {
    fn from_seed(seed: &[u8; 32], index: u32) -> Self {
        let okm = derive_array::<MESSAGE_KEYS_LEN>(seed, None, MESSAGE_KEYS_INFO);

        let mut cipher_key = [0u8; 32];
        let mut nonce = [0u8; NONCE_SIZE];
        cipher_key.copy_from_slice(&okm[..32]);
        nonce.copy_from_slice(&okm[32..]);

        Self { cipher_key, nonce, index }
    }

    /// Chain index this key was derived at.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// 32-byte `XChaCha20-Poly1305` key.
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    /// 24-byte nonce bound to this key.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Encrypt a message under this key.
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> Vec<u8> {
        aead_encrypt(&self.cipher_key, &self.nonce, plaintext, associated_data)
    }

    /// Decrypt a message under this key.
    pub fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        aead_decrypt(&self.cipher_key, &self.nonce, ciphertext, associated_data)
    }
}

impl fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageKeys").field("index", &self.index).finish_non_exhaustive()
    }
}

/// A 32-byte chain key at a given index.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    /// Create a chain key at `index`.
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    /// Index of the next message key this chain will produce.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Raw chain key bytes.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Message keys for the current index. Does not advance the chain.
    pub fn message_keys(&self) -> MessageKeys {
        let seed = hmac_sha256(&self.key, MESSAGE_KEY_SEED);
        let keys = MessageKeys::from_seed(&seed, self.index);
        let mut seed = seed;
        seed.zeroize();
        keys
    }

    /// The chain key one step ahead.
    ///
    /// # Errors
    ///
    /// - `CounterOverflow` if the index is already `u32::MAX`
    pub fn next_chain_key(&self) -> Result<Self, CryptoError> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(CryptoError::CounterOverflow { current: self.index })?;
        Ok(Self { key: hmac_sha256(&self.key, CHAIN_KEY_SEED), index })
    }

    /// Derive the current message keys and step the chain forward.
    ///
    /// This operation:
    /// 1. Derives the message keys for the current index
    /// 2. Derives the next chain key
    /// 3. Overwrites (zeroizes) the old chain key
    /// 4. Increments the index
    pub fn advance(&mut self) -> Result<MessageKeys, CryptoError> {
        let next = self.next_chain_key()?;
        let message_keys = self.message_keys();
        *self = next;
        Ok(message_keys)
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainKey").field("index", &self.index).finish_non_exhaustive()
    }
}

/// Root key of the DH ratchet.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct RootKey {
    key: [u8; 32],
}

impl RootKey {
    /// Wrap 32 bytes of root key material.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Raw root key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// One DH-ratchet step.
    ///
    /// Mixes `DH(our_ratchet_private, their_ratchet_key)` into the root key
    /// and returns the replacement root key plus a fresh chain key at index 0.
    /// The old root key must not be used again.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_private: &PrivateKey,
    ) -> Result<(Self, ChainKey), CryptoError> {
        let shared_secret = diffie_hellman(our_ratchet_private, their_ratchet_key)?;
        let okm = derive_array::<64>(&*shared_secret, Some(&self.key[..]), ROOT_CHAIN_INFO);

        let mut root = [0u8; 32];
        let mut chain = [0u8; 32];
        root.copy_from_slice(&okm[..32]);
        chain.copy_from_slice(&okm[32..]);

        Ok((Self { key: root }, ChainKey::new(chain, 0)))
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey(..)")
    }
}
