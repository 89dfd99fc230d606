//! Curve key material: X25519 agreement keys and Ed25519 signing keys
//!
//! Private key bytes live in wrappers that zeroize on drop. The dalek
//! implementations are constant-time with respect to secret scalars; this
//! module never branches on secret bytes.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Size of X25519 and Ed25519 keys in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Size of a serialized [`IdentityKey`]
pub const IDENTITY_KEY_SIZE: usize = 2 * KEY_SIZE;

/// Size of a serialized [`IdentityKeyPair`]: both private halves followed by
/// the public identity
pub const IDENTITY_KEY_PAIR_SIZE: usize = 2 * KEY_SIZE + IDENTITY_KEY_SIZE;

/// X25519 public key (raw Montgomery u-coordinate).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from an untrusted slice.
    ///
    /// Only the length is checked here; low-order points are caught by
    /// [`diffie_hellman`] when the agreement turns out non-contributory.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// X25519 private key.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Generate a fresh private key from the caller's CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rng.fill_bytes(&mut *bytes);
        Self(*bytes)
    }

    /// Wrap raw private key bytes. Clamping happens inside the scalar
    /// multiplication.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw private key bytes, for persisting key material.
    pub fn serialize(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.0)
    }

    /// Public key matching this private key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    fn to_static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// X25519 Diffie-Hellman agreement.
///
/// Both parties compute the same 32-byte secret:
/// `DH(a, B) == DH(b, A)`.
///
/// # Errors
///
/// - `InvalidKey` if the peer key is a low-order point, which would make the
///   output independent of our private key
pub fn diffie_hellman(
    own_private: &PrivateKey,
    peer_public: &PublicKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let secret = own_private.to_static_secret();
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer_public.0));

    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey { reason: "non-contributory agreement" });
    }

    Ok(Zeroizing::new(shared.to_bytes()))
}

/// An X25519 key pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public half
    pub public_key: PublicKey,
    /// Private half, zeroized on drop
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private(PrivateKey::generate(rng))
    }

    /// Rebuild a key pair from its private half.
    pub fn from_private(private_key: PrivateKey) -> Self {
        Self { public_key: private_key.public_key(), private_key }
    }

    /// Agreement with a peer public key using our private half.
    pub fn calculate_agreement(
        &self,
        peer_public: &PublicKey,
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        diffie_hellman(&self.private_key, peer_public)
    }
}

/// Ed25519 verification key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationKey([u8; KEY_SIZE]);

impl VerificationKey {
    /// Parse and validate a verification key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` for anything other than 32 bytes
    /// - `InvalidKey` if the bytes do not decode to a curve point
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        VerifyingKey::from_bytes(&array)
            .map_err(|_| CryptoError::InvalidKey { reason: "not an Ed25519 point" })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Verify an Ed25519 signature.
    ///
    /// Uses strict verification, so malleable or small-order signatures are
    /// rejected. Returns `false` for any malformed input.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        key.verify_strict(message, &Signature::from_bytes(&signature)).is_ok()
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationKey({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Ed25519 signing key pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct SigningKeyPair {
    verification_key: VerificationKey,
    seed: SigningSeed,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
struct SigningSeed([u8; KEY_SIZE]);

impl SigningKeyPair {
    /// Generate a fresh signing key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = SigningSeed([0u8; KEY_SIZE]);
        rng.fill_bytes(&mut seed.0);
        Self::from_seed(seed)
    }

    fn from_seed(seed: SigningSeed) -> Self {
        let verifying = SigningKey::from_bytes(&seed.0).verifying_key();
        Self { verification_key: VerificationKey(verifying.to_bytes()), seed }
    }

    /// Public verification key.
    pub fn verification_key(&self) -> VerificationKey {
        self.verification_key
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        SigningKey::from_bytes(&self.seed.0).sign(message).to_bytes()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("verification_key", &self.verification_key)
            .finish_non_exhaustive()
    }
}

/// Public identity of a party: agreement key plus verification key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    agreement_key: PublicKey,
    verification_key: VerificationKey,
}

impl IdentityKey {
    /// Combine an agreement key and a verification key into an identity.
    pub fn new(agreement_key: PublicKey, verification_key: VerificationKey) -> Self {
        Self { agreement_key, verification_key }
    }

    /// X25519 key used in the X3DH agreements.
    pub fn agreement_key(&self) -> &PublicKey {
        &self.agreement_key
    }

    /// Ed25519 key used to verify signed pre-keys.
    pub fn verification_key(&self) -> &VerificationKey {
        &self.verification_key
    }

    /// Verify a signature made by the matching [`IdentityKeyPair`].
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.verification_key.verify(message, signature)
    }

    /// Serialize as `agreement_key || verification_key`.
    pub fn serialize(&self) -> [u8; IDENTITY_KEY_SIZE] {
        let mut out = [0u8; IDENTITY_KEY_SIZE];
        out[..KEY_SIZE].copy_from_slice(self.agreement_key.as_bytes());
        out[KEY_SIZE..].copy_from_slice(self.verification_key.as_bytes());
        out
    }

    /// Parse the output of [`Self::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != IDENTITY_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: IDENTITY_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let agreement_key = PublicKey::from_slice(&bytes[..KEY_SIZE])?;
        let verification_key = VerificationKey::from_slice(&bytes[KEY_SIZE..])?;
        Ok(Self { agreement_key, verification_key })
    }
}

/// Long-lived identity key pair owned by one party.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    agreement: KeyPair,
    signing: SigningKeyPair,
}

impl IdentityKeyPair {
    /// Generate a fresh identity.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { agreement: KeyPair::generate(rng), signing: SigningKeyPair::generate(rng) }
    }

    /// Public identity.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.agreement.public_key, self.signing.verification_key())
    }

    /// Private agreement key for X3DH.
    pub fn private_key(&self) -> &PrivateKey {
        &self.agreement.private_key
    }

    /// Sign a message (used for signed pre-keys).
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message)
    }

    /// Serialize as `agreement_private || signing_seed || identity_key`.
    pub fn serialize(&self) -> Zeroizing<[u8; IDENTITY_KEY_PAIR_SIZE]> {
        let mut out = Zeroizing::new([0u8; IDENTITY_KEY_PAIR_SIZE]);
        out[..KEY_SIZE].copy_from_slice(&self.agreement.private_key.0);
        out[KEY_SIZE..2 * KEY_SIZE].copy_from_slice(&self.signing.seed.0);
        out[2 * KEY_SIZE..].copy_from_slice(&self.identity_key().serialize());
        out
    }

    /// Rebuild an identity from the output of [`Self::serialize`].
    ///
    /// The public identity is recomputed from the private halves and must
    /// match the stored one.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` for anything other than
    ///   [`IDENTITY_KEY_PAIR_SIZE`] bytes
    /// - `InvalidKey` if the stored public identity does not belong to the
    ///   private halves
    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != IDENTITY_KEY_PAIR_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: IDENTITY_KEY_PAIR_SIZE,
                actual: bytes.len(),
            });
        }

        let mut private = [0u8; KEY_SIZE];
        private.copy_from_slice(&bytes[..KEY_SIZE]);
        let mut seed = SigningSeed([0u8; KEY_SIZE]);
        seed.0.copy_from_slice(&bytes[KEY_SIZE..2 * KEY_SIZE]);

        let pair = Self {
            agreement: KeyPair::from_private(PrivateKey(private)),
            signing: SigningKeyPair::from_seed(seed),
        };
        private.zeroize();

        if pair.identity_key().serialize()[..] != bytes[2 * KEY_SIZE..] {
            return Err(CryptoError::InvalidKey {
                reason: "public identity does not match private key",
            });
        }
        Ok(pair)
    }
}
