//! Pairwise envelopes: ratchet messages and pre-key messages.

use bytes::{Buf, BufMut};
use quiver_crypto::{IDENTITY_KEY_SIZE, IdentityKey, KEY_SIZE, PublicKey, TAG_SIZE};

use super::{MESSAGE_VERSION, invalid, read_array, read_u32, read_version};
use crate::error::SessionError;

/// Double Ratchet message.
///
/// The header (everything before the ciphertext) is bound into the AEAD
/// associated data, so it cannot be altered without failing decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
}

impl SignalMessage {
    /// Serialized header length
    pub const HEADER_LEN: usize = 1 + KEY_SIZE + 4 + 4;

    /// Assemble a message.
    pub fn new(
        ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self { ratchet_key, counter, previous_counter, ciphertext }
    }

    /// Sender's current ratchet public key.
    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    /// Index of this message in the sender's chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Length of the sender's previous sending chain.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Ciphertext with appended tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Header bytes covered by the AEAD.
    pub fn header_bytes(&self) -> [u8; Self::HEADER_LEN] {
        encode_header(&self.ratchet_key, self.counter, self.previous_counter)
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.ciphertext.len());
        out.put_slice(&self.header_bytes());
        out.put_slice(&self.ciphertext);
        out
    }

    /// Parse from wire format.
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` if the version is unknown, the header is truncated,
    ///   or the ciphertext is shorter than an authentication tag
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let mut buf = bytes;
        read_version(&mut buf)?;

        let ratchet_key = PublicKey::from_bytes(read_array::<KEY_SIZE>(&mut buf)?);
        let counter = read_u32(&mut buf)?;
        let previous_counter = read_u32(&mut buf)?;

        if buf.remaining() < TAG_SIZE {
            return Err(invalid("ciphertext shorter than tag"));
        }

        Ok(Self { ratchet_key, counter, previous_counter, ciphertext: buf.to_vec() })
    }
}

/// Header layout shared by encrypt (before the message exists) and decrypt.
pub(crate) fn encode_header(
    ratchet_key: &PublicKey,
    counter: u32,
    previous_counter: u32,
) -> [u8; SignalMessage::HEADER_LEN] {
    let mut out = [0u8; SignalMessage::HEADER_LEN];
    let mut dst = &mut out[..];
    dst.put_u8(MESSAGE_VERSION);
    dst.put_slice(ratchet_key.as_bytes());
    dst.put_u32(counter);
    dst.put_u32(previous_counter);
    out
}

/// Ratchet message wrapped with the X3DH parameters the responder needs to
/// build the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeySignalMessage {
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
}

impl PreKeySignalMessage {
    const FIXED_LEN: usize = 1 + 4 + 1 + 4 + 4 + KEY_SIZE + IDENTITY_KEY_SIZE;

    /// Assemble a pre-key message.
    pub fn new(
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Self {
        Self { registration_id, pre_key_id, signed_pre_key_id, base_key, identity_key, message }
    }

    /// Sender's registration id.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// One-time pre-key the sender used, if any.
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    /// Signed pre-key the sender used.
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    /// Sender's X3DH base (ephemeral) key.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// Sender's identity key.
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    /// Wrapped ratchet message.
    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let inner = self.message.serialize();
        let mut out = Vec::with_capacity(Self::FIXED_LEN + inner.len());
        out.put_u8(MESSAGE_VERSION);
        out.put_u32(self.registration_id);
        out.put_u8(u8::from(self.pre_key_id.is_some()));
        out.put_u32(self.pre_key_id.unwrap_or(0));
        out.put_u32(self.signed_pre_key_id);
        out.put_slice(self.base_key.as_bytes());
        out.put_slice(&self.identity_key.serialize());
        out.put_slice(&inner);
        out
    }

    /// Parse from wire format.
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` for truncation or an invalid pre-key flag
    /// - `InvalidKey` if the identity key does not decode
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SessionError> {
        let mut buf = bytes;
        read_version(&mut buf)?;

        let registration_id = read_u32(&mut buf)?;
        let has_pre_key = buf.try_get_u8().map_err(|_| invalid("truncated message"))?;
        let pre_key_id = read_u32(&mut buf)?;
        let pre_key_id = match (has_pre_key, pre_key_id) {
            (0, 0) => None,
            (1, id) => Some(id),
            _ => return Err(invalid("invalid pre-key flag")),
        };
        let signed_pre_key_id = read_u32(&mut buf)?;
        let base_key = PublicKey::from_bytes(read_array::<KEY_SIZE>(&mut buf)?);
        let identity_key = IdentityKey::deserialize(&read_array::<IDENTITY_KEY_SIZE>(&mut buf)?)?;
        let message = SignalMessage::deserialize(buf)?;

        Ok(Self { registration_id, pre_key_id, signed_pre_key_id, base_key, identity_key, message })
    }
}
