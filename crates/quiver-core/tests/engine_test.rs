//! Engine transaction tests
//!
//! Each engine call loads a record, runs the state machine and stores the
//! result. These tests check the storage side of that contract: one-time
//! pre-keys are consumed exactly once, rejected messages never change stored
//! bytes, and concurrent callers on one session are serialized.

use quiver_core::{
    CiphertextMessage, EngineConfig, MemoryStore, PreKeyBundle, PreKeyRecord, PreKeySignalMessage,
    ProtocolAddress, ProtocolEngine, ProtocolStore, SessionError, SignalMessage,
    SignedPreKeyRecord,
};
use quiver_crypto::IdentityKeyPair;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

struct Party {
    address: ProtocolAddress,
    engine: ProtocolEngine<MemoryStore>,
}

impl Party {
    fn new(name: &str, registration_id: u32, rng: &mut ChaCha20Rng) -> Self {
        let store = MemoryStore::new(IdentityKeyPair::generate(rng), registration_id);
        Self {
            address: ProtocolAddress::new(name, 1),
            engine: ProtocolEngine::new(store, EngineConfig::default()),
        }
    }

    fn store(&self) -> &MemoryStore {
        self.engine.store()
    }

    /// Generate a bundle. With `keep` false nothing is stored, so the bundle
    /// points at keys we never held.
    fn bundle(
        &self,
        signed_pre_key_id: u32,
        pre_key_id: Option<u32>,
        keep: bool,
        rng: &mut ChaCha20Rng,
    ) -> PreKeyBundle {
        let store = self.store();
        let identity = store.identity_key_pair().unwrap();

        let signed = SignedPreKeyRecord::generate(signed_pre_key_id, &identity, 0, rng);
        let one_time = pre_key_id.map(|id| PreKeyRecord::generate(id, rng));
        if keep {
            store.store_signed_pre_key(signed.id, &signed).unwrap();
            if let Some(record) = &one_time {
                store.store_pre_key(record.id, record).unwrap();
            }
        }

        PreKeyBundle::from_records(
            store.local_registration_id().unwrap(),
            self.address.device_id(),
            identity.identity_key(),
            &signed,
            one_time.as_ref(),
        )
    }
}

fn as_pre_key(message: &CiphertextMessage) -> &PreKeySignalMessage {
    match message {
        CiphertextMessage::PreKey(message) => message,
        CiphertextMessage::Signal(_) => panic!("expected a pre-key message"),
    }
}

fn as_signal(message: &CiphertextMessage) -> &SignalMessage {
    match message {
        CiphertextMessage::Signal(message) => message,
        CiphertextMessage::PreKey(_) => panic!("expected a signal message"),
    }
}

fn forge(message: &SignalMessage) -> SignalMessage {
    let mut ciphertext = message.ciphertext().to_vec();
    let last = ciphertext.len() - 1;
    ciphertext[last] ^= 0x80;
    SignalMessage::new(
        *message.ratchet_key(),
        message.counter(),
        message.previous_counter(),
        ciphertext,
    )
}

/// Alice and Bob with an established session: hello and hi exchanged.
fn established(seed: u64) -> (Party, Party, ChaCha20Rng) {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let bundle = bob.bundle(1, Some(100), true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();
    bob.engine.decrypt_message(&alice.address, &hello).unwrap();
    let hi = bob.engine.encrypt_message(&alice.address, b"hi", &mut rng).unwrap();
    alice.engine.decrypt_message(&bob.address, &hi).unwrap();

    (alice, bob, rng)
}

#[test]
fn pre_key_is_consumed_exactly_once() {
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let bundle = bob.bundle(1, Some(100), true, &mut rng);
    assert_eq!(bob.store().pre_key_count().unwrap(), 1);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

    let first = alice.engine.encrypt_message(&bob.address, b"first", &mut rng).unwrap();
    let second = alice.engine.encrypt_message(&bob.address, b"second", &mut rng).unwrap();
    assert_eq!(as_pre_key(&first).pre_key_id(), Some(100));

    assert_eq!(bob.engine.decrypt_message(&alice.address, &first).unwrap(), b"first");
    assert_eq!(bob.store().pre_key_count().unwrap(), 0);

    // Same handshake again: the session is reused, nothing more is consumed.
    assert_eq!(bob.engine.decrypt_message(&alice.address, &second).unwrap(), b"second");
    assert!(matches!(
        bob.engine.decrypt_message(&alice.address, &first),
        Err(SessionError::DuplicateOrOldMessage { .. })
    ));
}

#[test]
fn pre_key_message_survives_the_wire() {
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let bundle = bob.bundle(1, Some(100), true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();
    let hello = alice.engine.encrypt_message(&bob.address, b"over the wire", &mut rng).unwrap();

    let received = PreKeySignalMessage::deserialize(&hello.serialize()).unwrap();
    assert_eq!(received.registration_id(), 1);
    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &CiphertextMessage::PreKey(received)).unwrap(),
        b"over the wire"
    );
}

#[test]
fn unknown_signed_pre_key_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let bundle = bob.bundle(7, None, false, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();
    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();

    let err = bob.engine.decrypt_message(&alice.address, &hello).unwrap_err();
    assert_eq!(err, SessionError::UnknownSignedPreKey { signed_pre_key_id: 7 });
    assert!(err.is_fatal());
    assert!(bob.store().raw_session(&alice.address).unwrap().is_none());
}

#[test]
fn unknown_one_time_pre_key_is_rejected() {
    let mut rng = ChaCha20Rng::seed_from_u64(4);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let signed = bob.bundle(1, None, true, &mut rng);
    let mut bundle = bob.bundle(1, Some(55), false, &mut rng);
    bundle.signed_pre_key = signed.signed_pre_key;
    bundle.signed_pre_key_signature = signed.signed_pre_key_signature;

    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();
    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();

    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &hello),
        Err(SessionError::UnknownPreKey { pre_key_id: 55 })
    );
    assert!(bob.store().raw_session(&alice.address).unwrap().is_none());
}

#[test]
fn forged_pre_key_message_consumes_nothing() {
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let alice = Party::new("alice", 1, &mut rng);
    let bob = Party::new("bob", 2, &mut rng);

    let bundle = bob.bundle(1, Some(100), true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();
    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();
    let genuine = as_pre_key(&hello);

    let forged = CiphertextMessage::PreKey(PreKeySignalMessage::new(
        genuine.registration_id(),
        genuine.pre_key_id(),
        genuine.signed_pre_key_id(),
        *genuine.base_key(),
        *genuine.identity_key(),
        forge(genuine.message()),
    ));

    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &forged),
        Err(SessionError::AuthenticationFailed)
    );
    assert_eq!(bob.store().pre_key_count().unwrap(), 1);
    assert!(bob.store().raw_session(&alice.address).unwrap().is_none());

    assert_eq!(bob.engine.decrypt_message(&alice.address, &hello).unwrap(), b"hello");
    assert_eq!(bob.store().pre_key_count().unwrap(), 0);
}

#[test]
fn rejected_messages_leave_storage_untouched() {
    let (alice, bob, mut rng) = established(6);

    let message = alice.engine.encrypt_message(&bob.address, b"payload", &mut rng).unwrap();
    let signal = as_signal(&message);
    let before = bob.store().raw_session(&alice.address).unwrap();

    let forged = CiphertextMessage::Signal(forge(signal));
    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &forged),
        Err(SessionError::AuthenticationFailed)
    );
    assert_eq!(bob.store().raw_session(&alice.address).unwrap(), before);

    assert_eq!(bob.engine.decrypt_message(&alice.address, &message).unwrap(), b"payload");
    let after = bob.store().raw_session(&alice.address).unwrap();
    assert_ne!(after, before);

    assert!(matches!(
        bob.engine.decrypt_message(&alice.address, &message),
        Err(SessionError::DuplicateOrOldMessage { .. })
    ));
    assert_eq!(bob.store().raw_session(&alice.address).unwrap(), after);
}

#[test]
fn too_far_ahead_is_rejected_through_engine() {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let alice = Party::new("alice", 1, &mut rng);
    let mut config = EngineConfig::default();
    config.session.max_forward_jumps = 5;
    let bob = Party {
        address: ProtocolAddress::new("bob", 1),
        engine: ProtocolEngine::new(MemoryStore::new(IdentityKeyPair::generate(&mut rng), 2), config),
    };

    let bundle = bob.bundle(1, Some(100), true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

    let hello = alice.engine.encrypt_message(&bob.address, b"hello", &mut rng).unwrap();
    bob.engine.decrypt_message(&alice.address, &hello).unwrap();
    let before = bob.store().raw_session(&alice.address).unwrap();

    let mut last = None;
    for _ in 0..7 {
        last = Some(alice.engine.encrypt_message(&bob.address, b"later", &mut rng).unwrap());
    }
    let last = last.unwrap();

    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &last),
        Err(SessionError::TooManySkippedMessages { current: 1, received: 7, limit: 5 })
    );
    assert_eq!(bob.store().raw_session(&alice.address).unwrap(), before);
}

#[test]
fn missing_session_is_reported() {
    let (alice, bob, mut rng) = established(8);
    let carol = ProtocolAddress::new("carol", 1);

    assert!(matches!(
        alice.engine.encrypt_message(&carol, b"hi", &mut rng),
        Err(SessionError::SessionNotInitialized { .. })
    ));

    let message = alice.engine.encrypt_message(&bob.address, b"misrouted", &mut rng).unwrap();
    assert!(matches!(
        bob.engine.decrypt_message(&carol, &message),
        Err(SessionError::SessionNotInitialized { .. })
    ));
}

#[test]
fn delayed_message_from_replaced_session_still_decrypts() {
    let (alice, bob, mut rng) = established(9);

    let delayed = alice.engine.encrypt_message(&bob.address, b"from the old session", &mut rng).unwrap();

    // Alice reinstalls and starts over against a fresh bundle.
    let bundle = bob.bundle(2, Some(101), true, &mut rng);
    alice.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();
    let restart = alice.engine.encrypt_message(&bob.address, b"restart", &mut rng).unwrap();
    assert_eq!(as_pre_key(&restart).pre_key_id(), Some(101));

    assert_eq!(bob.engine.decrypt_message(&alice.address, &restart).unwrap(), b"restart");
    let record = bob.store().load_session(&alice.address).unwrap().unwrap();
    assert_eq!(record.archived_count(), 1);

    assert_eq!(
        bob.engine.decrypt_message(&alice.address, &delayed).unwrap(),
        b"from the old session"
    );
}

#[test]
fn concurrent_decrypts_are_serialized_per_session() {
    const PEERS: usize = 4;
    const MESSAGES: usize = 20;

    let mut rng = ChaCha20Rng::seed_from_u64(10);
    let bob = Party::new("bob", 2, &mut rng);

    let mut outboxes = Vec::new();
    for peer in 0..PEERS {
        let id = u32::try_from(peer).unwrap();
        let sender = Party::new(&format!("peer-{peer}"), 10 + id, &mut rng);
        let bundle = bob.bundle(1 + id, Some(100 + id), true, &mut rng);
        sender.engine.initialize_session(&bob.address, &bundle, &mut rng).unwrap();

        let messages: Vec<_> = (0..MESSAGES)
            .map(|i| {
                sender.engine.encrypt_message(&bob.address, format!("{i}").as_bytes(), &mut rng).unwrap()
            })
            .collect();
        outboxes.push((sender.address, messages));
    }

    let bob = &bob;
    std::thread::scope(|scope| {
        for (address, messages) in &outboxes {
            for parity in 0..2 {
                scope.spawn(move || {
                    for (i, message) in messages.iter().enumerate().filter(|(i, _)| i % 2 == parity) {
                        let plaintext = bob.engine.decrypt_message(address, message).unwrap();
                        assert_eq!(plaintext, format!("{i}").into_bytes());
                    }
                });
            }
        }
    });

    assert_eq!(bob.store().pre_key_count().unwrap(), 0);
}
