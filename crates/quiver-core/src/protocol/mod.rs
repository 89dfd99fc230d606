//! Wire envelopes.
//!
//! Fixed big-endian layouts, parsed with explicit length checks. Parsing only
//! establishes structure: nothing here is authenticated until the ratchet
//! opens the ciphertext (pairwise) or the signature verifies (group).
//!
//! | Message | Layout |
//! |---------|--------|
//! | [`SignalMessage`] | `ver u8 \| ratchet key [32] \| counter u32 \| previous counter u32 \| ciphertext` |
//! | [`PreKeySignalMessage`] | `ver u8 \| registration id u32 \| has pre-key u8 \| pre-key id u32 \| signed pre-key id u32 \| base key [32] \| identity [64] \| signal message` |
//! | [`SenderKeyMessage`] | `ver u8 \| distribution id u128 \| chain id u32 \| iteration u32 \| len u32 \| ciphertext \| signature [64]` |
//! | [`SenderKeyDistributionMessage`] | `ver u8 \| distribution id u128 \| chain id u32 \| iteration u32 \| chain key [32] \| signing key [32]` |

mod sender_key;
mod signal;

use bytes::Buf;
pub use sender_key::{SenderKeyDistributionMessage, SenderKeyMessage};
pub(crate) use signal::encode_header;
pub use signal::{PreKeySignalMessage, SignalMessage};

use crate::error::SessionError;

/// Envelope format version
pub const MESSAGE_VERSION: u8 = 1;

/// Output of a pairwise encrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiphertextMessage {
    /// Ordinary ratchet message
    Signal(SignalMessage),
    /// First messages of a session, carrying the X3DH parameters
    PreKey(PreKeySignalMessage),
}

impl CiphertextMessage {
    /// Serialize the wrapped envelope.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Signal(message) => message.serialize(),
            Self::PreKey(message) => message.serialize(),
        }
    }
}

pub(crate) fn invalid(reason: &'static str) -> SessionError {
    SessionError::InvalidMessage { reason }
}

pub(crate) fn read_version(buf: &mut &[u8]) -> Result<(), SessionError> {
    let version = buf.try_get_u8().map_err(|_| invalid("empty message"))?;
    if version != MESSAGE_VERSION {
        return Err(invalid("unsupported version"));
    }
    Ok(())
}

pub(crate) fn read_u32(buf: &mut &[u8]) -> Result<u32, SessionError> {
    buf.try_get_u32().map_err(|_| invalid("truncated message"))
}

pub(crate) fn read_u128(buf: &mut &[u8]) -> Result<u128, SessionError> {
    buf.try_get_u128().map_err(|_| invalid("truncated message"))
}

pub(crate) fn read_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], SessionError> {
    let mut out = [0u8; N];
    buf.try_copy_to_slice(&mut out).map_err(|_| invalid("truncated message"))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_version_rejects_unknown() {
        let mut buf: &[u8] = &[MESSAGE_VERSION + 1];
        assert_eq!(read_version(&mut buf), Err(invalid("unsupported version")));
    }

    #[test]
    fn read_version_rejects_empty() {
        let mut buf: &[u8] = &[];
        assert_eq!(read_version(&mut buf), Err(invalid("empty message")));
    }

    #[test]
    fn read_u32_rejects_short_input() {
        let mut buf: &[u8] = &[0, 0, 1];
        assert!(read_u32(&mut buf).is_err());
    }

    #[test]
    fn read_array_consumes_exact_bytes() {
        let mut buf: &[u8] = &[1, 2, 3, 4, 5];
        let array: [u8; 3] = read_array(&mut buf).unwrap();
        assert_eq!(array, [1, 2, 3]);
        assert_eq!(buf, &[4, 5]);
    }
}
