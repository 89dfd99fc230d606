//! Quiver Cryptographic Primitives
//!
//! Key material and symmetric ratchet building blocks for the Quiver session
//! engine. Pure functions with deterministic outputs: anything random takes a
//! caller-supplied CSPRNG so tests can seed it.
//!
//! # Key Lifecycle
//!
//! A session starts from an X3DH shared secret. The root key is stepped by
//! every DH ratchet turn; each turn yields a fresh chain key, and the chain
//! ratchet produces one-time message keys.
//!
//! ```text
//! X3DH shared secret
//!        │
//!        ▼
//! RootKey ── create_chain(DH) ──► RootKey'
//!        │
//!        ▼
//! ChainKey[0] → ChainKey[1] → ...
//!        │
//!        ▼
//! MessageKeys (cipher key + nonce)
//!        │
//!        ▼
//! XChaCha20-Poly1305 → Ciphertext
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain advancement: the old chain key is overwritten after deriving the
//!   next one
//! - Message key disposal: keys are zeroized on drop after a single use
//!
//! Post-Compromise Security:
//! - Every DH ratchet step mixes a fresh ephemeral secret into the root key
//!
//! Authenticity:
//! - Poly1305 tag covers ciphertext and associated data
//! - Failed authentication tag -> reject message

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod ratchet;

pub use aead::{NONCE_SIZE, TAG_SIZE, aead_decrypt, aead_encrypt};
pub use error::CryptoError;
pub use kdf::{MAX_OUTPUT_LEN, derive_keys};
pub use keys::{
    IDENTITY_KEY_PAIR_SIZE, IDENTITY_KEY_SIZE, IdentityKey, IdentityKeyPair, KEY_SIZE, KeyPair,
    PrivateKey, PublicKey, SIGNATURE_SIZE, SigningKeyPair, VerificationKey, diffie_hellman,
};
pub use ratchet::{ChainKey, MessageKeys, RootKey};
