//! Group envelopes: sender-key messages and their distribution messages.

use std::fmt;

use bytes::{Buf, BufMut};
use quiver_crypto::{KEY_SIZE, SIGNATURE_SIZE, SigningKeyPair, VerificationKey};
use zeroize::Zeroize;

use super::{MESSAGE_VERSION, invalid, read_array, read_u32, read_u128, read_version};
use crate::{address::DistributionId, error::SessionError};

/// Group message encrypted under a sender chain and signed by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyMessage {
    distribution_id: DistributionId,
    chain_id: u32,
    iteration: u32,
    ciphertext: Vec<u8>,
    signature: [u8; SIGNATURE_SIZE],
}

impl SenderKeyMessage {
    const BODY_PREFIX_LEN: usize = 1 + 16 + 4 + 4 + 4;

    /// Build and sign a message.
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` if the ciphertext does not fit the 32-bit length
    ///   field
    pub fn new_signed(
        distribution_id: DistributionId,
        chain_id: u32,
        iteration: u32,
        ciphertext: Vec<u8>,
        signing_key: &SigningKeyPair,
    ) -> Result<Self, SessionError> {
        encoded_len(ciphertext.len())?;
        let mut message =
            Self { distribution_id, chain_id, iteration, ciphertext, signature: [0u8; SIGNATURE_SIZE] };
        message.signature = signing_key.sign(&message.body());
        Ok(message)
    }

    /// Group this message belongs to.
    pub fn distribution_id(&self) -> DistributionId {
        self.distribution_id
    }

    /// Sender chain that produced the key.
    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// Chain iteration of the message key.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Ciphertext with appended tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Check the sender's signature over the serialized body.
    pub fn verify_signature(&self, key: &VerificationKey) -> bool {
        key.verify(&self.body(), &self.signature)
    }

    /// Serialized message without the trailing signature.
    fn body(&self) -> Vec<u8> {
        // Every constructor bounds the ciphertext by the length field.
        let Ok(ciphertext_len) = encoded_len(self.ciphertext.len()) else {
            unreachable!("ciphertext length checked on construction");
        };

        let mut out = Vec::with_capacity(Self::BODY_PREFIX_LEN + self.ciphertext.len());
        out.put_u8(MESSAGE_VERSION);
        out.put_u128(self.distribution_id);
        out.put_u32(self.chain_id);
        out.put_u32(self.iteration);
        out.put_u32(ciphertext_len);
        out.put_slice(&self.ciphertext);
        out
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.body();
        out.put_slice(&self.signature);
        out
    }

    /// Parse from wire format. The signature is not checked here.
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` for truncation, a length field that disagrees with
    ///   the input, or trailing bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let mut buf = bytes;
        read_version(&mut buf)?;

        let distribution_id = read_u128(&mut buf)?;
        let chain_id = read_u32(&mut buf)?;
        let iteration = read_u32(&mut buf)?;
        let ciphertext_len = read_u32(&mut buf)? as usize;

        if buf.remaining() != ciphertext_len.saturating_add(SIGNATURE_SIZE) {
            return Err(invalid("ciphertext length mismatch"));
        }

        let ciphertext = buf[..ciphertext_len].to_vec();
        buf.advance(ciphertext_len);
        let signature = read_array::<SIGNATURE_SIZE>(&mut buf)?;

        Ok(Self { distribution_id, chain_id, iteration, ciphertext, signature })
    }
}

/// Ciphertext length as carried in the 32-bit length field.
fn encoded_len(len: usize) -> Result<u32, SessionError> {
    u32::try_from(len).map_err(|_| invalid("ciphertext too long"))
}

/// Everything a group member needs to decrypt one sender's messages, starting
/// at `iteration`. Carries secret chain key material, so it must travel over
/// an encrypted pairwise session.
#[derive(Clone, PartialEq, Eq)]
pub struct SenderKeyDistributionMessage {
    distribution_id: DistributionId,
    chain_id: u32,
    iteration: u32,
    chain_key: [u8; KEY_SIZE],
    signing_key: VerificationKey,
}

impl SenderKeyDistributionMessage {
    const LEN: usize = 1 + 16 + 4 + 4 + KEY_SIZE + KEY_SIZE;

    /// Assemble a distribution message.
    pub fn new(
        distribution_id: DistributionId,
        chain_id: u32,
        iteration: u32,
        chain_key: [u8; KEY_SIZE],
        signing_key: VerificationKey,
    ) -> Self {
        Self { distribution_id, chain_id, iteration, chain_key, signing_key }
    }

    /// Group this sender key belongs to.
    pub fn distribution_id(&self) -> DistributionId {
        self.distribution_id
    }

    /// Sender chain id.
    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// Iteration the chain key is at.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Chain key at `iteration`.
    pub fn chain_key(&self) -> &[u8; KEY_SIZE] {
        &self.chain_key
    }

    /// Key that verifies the sender's message signatures.
    pub fn signing_key(&self) -> &VerificationKey {
        &self.signing_key
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.put_u8(MESSAGE_VERSION);
        out.put_u128(self.distribution_id);
        out.put_u32(self.chain_id);
        out.put_u32(self.iteration);
        out.put_slice(&self.chain_key);
        out.put_slice(self.signing_key.as_bytes());
        out
    }

    /// Parse from wire format.
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` for truncation or trailing bytes
    /// - `InvalidKey` if the signing key is not an Ed25519 point
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() != Self::LEN {
            return Err(invalid("distribution message length"));
        }

        let mut buf = bytes;
        read_version(&mut buf)?;

        let distribution_id = read_u128(&mut buf)?;
        let chain_id = read_u32(&mut buf)?;
        let iteration = read_u32(&mut buf)?;
        let chain_key = read_array::<KEY_SIZE>(&mut buf)?;
        let signing_key = VerificationKey::from_slice(&read_array::<KEY_SIZE>(&mut buf)?)?;

        Ok(Self { distribution_id, chain_id, iteration, chain_key, signing_key })
    }
}

impl Drop for SenderKeyDistributionMessage {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

impl fmt::Debug for SenderKeyDistributionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKeyDistributionMessage")
            .field("distribution_id", &self.distribution_id)
            .field("chain_id", &self.chain_id)
            .field("iteration", &self.iteration)
            .field("signing_key", &self.signing_key)
            .finish_non_exhaustive()
    }
}
