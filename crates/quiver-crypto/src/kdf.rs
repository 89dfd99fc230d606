//! HKDF and HMAC helpers

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Largest output HKDF-SHA256 can produce (255 blocks of 32 bytes)
pub const MAX_OUTPUT_LEN: usize = 255 * 32;

/// HKDF-SHA256 extract-and-expand.
///
/// Deterministic: the same `(input_key_material, salt, info, output_len)`
/// always yields the same bytes. A `None` salt means a zero-filled salt of
/// hash length.
///
/// # Errors
///
/// - `InvalidOutputLength` if `output_len` is zero or above
///   [`MAX_OUTPUT_LEN`]
pub fn derive_keys(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if output_len == 0 || output_len > MAX_OUTPUT_LEN {
        return Err(CryptoError::InvalidOutputLength { requested: output_len });
    }

    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|_| CryptoError::InvalidOutputLength { requested: output_len })?;

    Ok(okm)
}

/// Fixed-size variant of [`derive_keys`] for lengths known at compile time.
pub(crate) fn derive_array<const N: usize>(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Zeroizing<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut okm = Zeroizing::new([0u8; N]);
    let Ok(()) = hkdf.expand(info, &mut *okm) else {
        unreachable!("ratchet output lengths are valid HKDF-SHA256 lengths");
    };
    okm
}

/// HMAC-SHA256 of `data` under `key`.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = derive_keys(b"ikm", Some(&b"salt"[..]), b"info", 64).unwrap();
        let b = derive_keys(b"ikm", Some(&b"salt"[..]), b"info", 64).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn different_info_produces_different_output() {
        let a = derive_keys(b"ikm", None, b"handshake", 32).unwrap();
        let b = derive_keys(b"ikm", None, b"ratchet", 32).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn zero_length_is_rejected() {
        let result = derive_keys(b"ikm", None, b"info", 0);
        assert!(matches!(result, Err(CryptoError::InvalidOutputLength { requested: 0 })));
    }

    #[test]
    fn oversized_output_is_rejected() {
        let result = derive_keys(b"ikm", None, b"info", MAX_OUTPUT_LEN + 1);
        assert!(result.is_err());
    }

    #[test]
    fn maximum_output_is_accepted() {
        let okm = derive_keys(b"ikm", None, b"info", MAX_OUTPUT_LEN).unwrap();
        assert_eq!(okm.len(), MAX_OUTPUT_LEN);
    }

    #[test]
    fn rfc5869_test_case_1() {
        let ikm = [0x0b; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = derive_keys(&ikm, Some(salt.as_slice()), &info, 42).unwrap();

        assert_eq!(
            hex::encode(&*okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn hmac_differs_by_label() {
        let key = [7u8; 32];
        assert_ne!(hmac_sha256(&key, &[0x01]), hmac_sha256(&key, &[0x02]));
    }
}
