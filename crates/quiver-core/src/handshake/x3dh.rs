//! X3DH key agreement.
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)        (only with a one-time pre-key)
//!
//! root = HKDF(DH1 || DH2 || DH3 [|| DH4], salt = 0^32, info = "handshake")
//! ```
//!
//! The initiator then runs the sending half of the first DH ratchet step
//! against the signed pre-key. The responder's signed pre-key pair doubles as
//! its first ratchet key pair, so the responder's first receive lands on the
//! same chain.

use quiver_crypto::{
    ChainKey, IdentityKey, IdentityKeyPair, KEY_SIZE, KeyPair, PublicKey, RootKey, derive_keys,
    diffie_hellman,
};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use super::bundle::PreKeyBundle;
use crate::{
    error::SessionError,
    session::{PendingPreKey, SessionState},
    skipped::SkippedKeys,
};

const HANDSHAKE_INFO: &[u8] = b"handshake";

/// Initiator inputs.
pub struct AliceParameters<'a> {
    /// Our long-term identity
    pub our_identity_key_pair: &'a IdentityKeyPair,
    /// Our ephemeral base key for this handshake
    pub our_base_key_pair: &'a KeyPair,
    /// Responder's identity
    pub their_identity_key: IdentityKey,
    /// Responder's signed pre-key
    pub their_signed_pre_key: PublicKey,
    /// Responder's one-time pre-key, if the bundle had one
    pub their_one_time_pre_key: Option<PublicKey>,
    /// Responder's first ratchet key (the signed pre-key)
    pub their_ratchet_key: PublicKey,
}

/// Responder inputs.
pub struct BobParameters<'a> {
    /// Our long-term identity
    pub our_identity_key_pair: &'a IdentityKeyPair,
    /// Signed pre-key the initiator used
    pub our_signed_pre_key_pair: &'a KeyPair,
    /// One-time pre-key the initiator used, if any
    pub our_one_time_pre_key_pair: Option<&'a KeyPair>,
    /// Our first ratchet key pair (the signed pre-key pair)
    pub our_ratchet_key_pair: &'a KeyPair,
    /// Initiator's identity
    pub their_identity_key: IdentityKey,
    /// Initiator's base key
    pub their_base_key: PublicKey,
}

/// Build the initiator's session.
///
/// Receiving chains start empty; the sending chain is ready for the first
/// message.
pub fn initialize_alice_session<R: RngCore + CryptoRng>(
    parameters: &AliceParameters<'_>,
    rng: &mut R,
) -> Result<SessionState, SessionError> {
    let base = parameters.our_base_key_pair;

    let mut secrets = Zeroizing::new(Vec::with_capacity(4 * KEY_SIZE));
    secrets.extend_from_slice(&*diffie_hellman(
        parameters.our_identity_key_pair.private_key(),
        &parameters.their_signed_pre_key,
    )?);
    secrets.extend_from_slice(&*diffie_hellman(
        &base.private_key,
        parameters.their_identity_key.agreement_key(),
    )?);
    secrets.extend_from_slice(&*diffie_hellman(&base.private_key, &parameters.their_signed_pre_key)?);
    if let Some(one_time) = &parameters.their_one_time_pre_key {
        secrets.extend_from_slice(&*diffie_hellman(&base.private_key, one_time)?);
    }

    let root_key = derive_root_key(&secrets)?;

    let sending_ratchet = KeyPair::generate(rng);
    let (root_key, sending_chain) =
        root_key.create_chain(&parameters.their_ratchet_key, &sending_ratchet.private_key)?;

    tracing::debug!(
        one_time_pre_key = parameters.their_one_time_pre_key.is_some(),
        "initiator session created"
    );

    Ok(new_state(
        parameters.our_identity_key_pair.identity_key(),
        parameters.their_identity_key,
        root_key,
        sending_ratchet,
        Some(parameters.their_ratchet_key),
        Some(sending_chain),
        base.public_key,
    ))
}

/// Build the responder's session.
///
/// There is no sending chain until the first message from the initiator has
/// been received.
pub fn initialize_bob_session(parameters: &BobParameters<'_>) -> Result<SessionState, SessionError> {
    let their_base = &parameters.their_base_key;

    let mut secrets = Zeroizing::new(Vec::with_capacity(4 * KEY_SIZE));
    secrets.extend_from_slice(&*diffie_hellman(
        &parameters.our_signed_pre_key_pair.private_key,
        parameters.their_identity_key.agreement_key(),
    )?);
    secrets.extend_from_slice(&*diffie_hellman(
        parameters.our_identity_key_pair.private_key(),
        their_base,
    )?);
    secrets.extend_from_slice(&*diffie_hellman(
        &parameters.our_signed_pre_key_pair.private_key,
        their_base,
    )?);
    if let Some(one_time) = parameters.our_one_time_pre_key_pair {
        secrets.extend_from_slice(&*diffie_hellman(&one_time.private_key, their_base)?);
    }

    let root_key = derive_root_key(&secrets)?;

    tracing::debug!(
        one_time_pre_key = parameters.our_one_time_pre_key_pair.is_some(),
        "responder session created"
    );

    Ok(new_state(
        parameters.our_identity_key_pair.identity_key(),
        parameters.their_identity_key,
        root_key,
        parameters.our_ratchet_key_pair.clone(),
        None,
        None,
        *their_base,
    ))
}

/// Initiator side of the handshake against a fetched bundle: verify the
/// signed pre-key, generate a base key, and build the session.
///
/// The returned state repeats the handshake parameters in every message until
/// the responder answers.
///
/// # Errors
///
/// - `InvalidSignature` if the signed pre-key signature does not verify
/// - `InvalidKey` if any bundle key is a low-order point
pub fn process_pre_key_bundle<R: RngCore + CryptoRng>(
    our_identity_key_pair: &IdentityKeyPair,
    bundle: &PreKeyBundle,
    rng: &mut R,
) -> Result<SessionState, SessionError> {
    if !bundle.verify_signature() {
        tracing::warn!(signed_pre_key_id = bundle.signed_pre_key_id, "bad signed pre-key signature");
        return Err(SessionError::InvalidSignature { context: "signed pre-key" });
    }

    let our_base_key_pair = KeyPair::generate(rng);
    let parameters = AliceParameters {
        our_identity_key_pair,
        our_base_key_pair: &our_base_key_pair,
        their_identity_key: bundle.identity_key,
        their_signed_pre_key: bundle.signed_pre_key,
        their_one_time_pre_key: bundle.pre_key.map(|(_, key)| key),
        their_ratchet_key: bundle.signed_pre_key,
    };

    let mut state = initialize_alice_session(&parameters, rng)?;
    state.set_pending_pre_key(PendingPreKey {
        pre_key_id: bundle.pre_key.map(|(id, _)| id),
        signed_pre_key_id: bundle.signed_pre_key_id,
        base_key: our_base_key_pair.public_key,
    });
    Ok(state)
}

fn derive_root_key(secrets: &[u8]) -> Result<RootKey, SessionError> {
    let okm = derive_keys(secrets, Some(&[0u8; KEY_SIZE][..]), HANDSHAKE_INFO, KEY_SIZE)?;
    let mut root = [0u8; KEY_SIZE];
    root.copy_from_slice(&okm);
    Ok(RootKey::new(root))
}

fn new_state(
    local_identity: IdentityKey,
    remote_identity: IdentityKey,
    root_key: RootKey,
    ratchet_key_pair: KeyPair,
    remote_ratchet_key: Option<PublicKey>,
    sending_chain: Option<ChainKey>,
    base_key: PublicKey,
) -> SessionState {
    SessionState {
        local_identity,
        remote_identity,
        local_registration_id: 0,
        remote_registration_id: 0,
        root_key,
        ratchet_key_pair,
        remote_ratchet_key,
        sending_chain,
        receiver_chains: Vec::new(),
        skipped: SkippedKeys::new(),
        previous_counter: 0,
        base_key,
        pending_pre_key: None,
    }
}
