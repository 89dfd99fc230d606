//! X3DH handshake tests
//!
//! Alice fetches Bob's bundle, sends "hello", Bob answers "hi". After that
//! exchange both sides must hold byte-equal root keys.

use quiver_core::{
    AliceParameters, BobParameters, CiphertextMessage, EngineConfig, MemoryStore, PreKeyBundle,
    PreKeyRecord, ProtocolAddress, ProtocolEngine, ProtocolStore, SessionConfig, SessionError,
    SignedPreKeyRecord, initialize_alice_session, initialize_bob_session,
};
use quiver_crypto::{IdentityKeyPair, KeyPair};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

struct Party {
    address: ProtocolAddress,
    engine: ProtocolEngine<MemoryStore>,
}

fn party(name: &str, registration_id: u32, rng: &mut ChaCha20Rng) -> Party {
    let identity = IdentityKeyPair::generate(rng);
    let store = MemoryStore::new(identity, registration_id);
    Party {
        address: ProtocolAddress::new(name, 1),
        engine: ProtocolEngine::new(store, EngineConfig::default()),
    }
}

fn publish_bundle(party: &Party, with_one_time: bool, rng: &mut ChaCha20Rng) -> PreKeyBundle {
    let store = party.engine.store();
    let identity = store.identity_key_pair().unwrap();

    let signed = SignedPreKeyRecord::generate(1, &identity, 1_700_000_000, rng);
    store.store_signed_pre_key(signed.id, &signed).unwrap();

    let one_time = with_one_time.then(|| {
        let record = PreKeyRecord::generate(100, rng);
        store.store_pre_key(record.id, &record).unwrap();
        record
    });

    PreKeyBundle::from_records(
        store.local_registration_id().unwrap(),
        party.address.device_id(),
        identity.identity_key(),
        &signed,
        one_time.as_ref(),
    )
}

fn hello_hi(with_one_time: bool, seed: u64) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let alice = party("alice", 1, &mut rng);
    let bob = party("bob", 2, &mut rng);

    let bundle = publish_bundle(&bob, with_one_time, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();
    assert!(matches!(hello, CiphertextMessage::PreKey(_)));
    assert_eq!(bob.engine.decrypt_message(&alice.address, &hello).unwrap(), b"hello");

    let hi = bob.engine.encrypt_message(&alice.address, b"hi", &mut rng).unwrap();
    assert!(matches!(hi, CiphertextMessage::Signal(_)));
    assert_eq!(alice.engine.decrypt_message(&bob.address, &hi).unwrap(), b"hi");

    let alice_root = alice.engine.session_root_key(&bob.address).unwrap().unwrap();
    let bob_root = bob.engine.session_root_key(&alice.address).unwrap().unwrap();
    assert_eq!(alice_root, bob_root);
}

#[test]
fn hello_hi_with_one_time_pre_key() {
    hello_hi(true, 1);
}

#[test]
fn hello_hi_without_one_time_pre_key() {
    hello_hi(false, 2);
}

#[test]
fn alice_stops_sending_pre_key_messages_after_reply() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let alice = party("alice", 1, &mut rng);
    let bob = party("bob", 2, &mut rng);

    let bundle = publish_bundle(&bob, true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

    let first = alice.engine.encrypt_message(&bob.address, b"one", &mut rng).unwrap();
    let second = alice.engine.encrypt_message(&bob.address, b"two", &mut rng).unwrap();
    assert!(matches!(second, CiphertextMessage::PreKey(_)));

    assert_eq!(bob.engine.decrypt_message(&alice.address, &first).unwrap(), b"one");
    assert_eq!(bob.engine.decrypt_message(&alice.address, &second).unwrap(), b"two");

    let reply = bob.engine.encrypt_message(&alice.address, b"ack", &mut rng).unwrap();
    alice.engine.decrypt_message(&bob.address, &reply).unwrap();

    let third = alice.engine.encrypt_message(&bob.address, b"three", &mut rng).unwrap();
    assert!(matches!(third, CiphertextMessage::Signal(_)));
    assert_eq!(bob.engine.decrypt_message(&alice.address, &third).unwrap(), b"three");
}

#[test]
fn direct_initialization_agrees() {
    let mut rng = ChaCha20Rng::seed_from_u64(4);
    let alice_identity = IdentityKeyPair::generate(&mut rng);
    let bob_identity = IdentityKeyPair::generate(&mut rng);
    let bob_signed = KeyPair::generate(&mut rng);
    let bob_one_time = KeyPair::generate(&mut rng);
    let alice_base = KeyPair::generate(&mut rng);

    let mut alice = initialize_alice_session(
        &AliceParameters {
            our_identity_key_pair: &alice_identity,
            our_base_key_pair: &alice_base,
            their_identity_key: bob_identity.identity_key(),
            their_signed_pre_key: bob_signed.public_key,
            their_one_time_pre_key: Some(bob_one_time.public_key),
            their_ratchet_key: bob_signed.public_key,
        },
        &mut rng,
    )
    .unwrap();

    let mut bob = initialize_bob_session(&BobParameters {
        our_identity_key_pair: &bob_identity,
        our_signed_pre_key_pair: &bob_signed,
        our_one_time_pre_key_pair: Some(&bob_one_time),
        our_ratchet_key_pair: &bob_signed,
        their_identity_key: alice_identity.identity_key(),
        their_base_key: alice_base.public_key,
    })
    .unwrap();

    let config = SessionConfig::default();

    let hello = alice.encrypt(b"hello", &mut rng).unwrap();
    assert_eq!(bob.decrypt(&hello, &config).unwrap(), b"hello");

    let hi = bob.encrypt(b"hi", &mut rng).unwrap();
    assert_eq!(alice.decrypt(&hi, &config).unwrap(), b"hi");

    assert_eq!(alice.root_key().as_bytes(), bob.root_key().as_bytes());
}

#[test]
fn responder_cannot_send_first() {
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let alice_identity = IdentityKeyPair::generate(&mut rng);
    let bob_identity = IdentityKeyPair::generate(&mut rng);
    let bob_signed = KeyPair::generate(&mut rng);

    let mut bob = initialize_bob_session(&BobParameters {
        our_identity_key_pair: &bob_identity,
        our_signed_pre_key_pair: &bob_signed,
        our_one_time_pre_key_pair: None,
        our_ratchet_key_pair: &bob_signed,
        their_identity_key: alice_identity.identity_key(),
        their_base_key: KeyPair::generate(&mut rng).public_key,
    })
    .unwrap();

    assert!(matches!(
        bob.encrypt(b"too early", &mut rng),
        Err(SessionError::SessionNotInitialized { .. })
    ));
}

#[test]
fn forged_bundle_signature_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(6);
    let alice = party("alice", 1, &mut rng);
    let bob = party("bob", 2, &mut rng);
    let mallory = IdentityKeyPair::generate(&mut rng);

    let mut bundle = publish_bundle(&bob, true, &mut rng);
    bundle.signed_pre_key_signature = mallory.sign(bundle.signed_pre_key.as_bytes()).to_vec();

    let err = alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap_err();
    assert!(matches!(err, SessionError::InvalidSignature { .. }));
    assert!(err.is_fatal());
    assert!(alice.engine.session_root_key(&bob.address).unwrap().is_none());
}
