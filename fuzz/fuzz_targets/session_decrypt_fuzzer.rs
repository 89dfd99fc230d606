//! Fuzz target for Double Ratchet decryption under hostile delivery
//!
//! # Strategy
//!
//! - Alice sends a batch, Bob replies, in arbitrary interleavings
//! - Messages are delivered in arbitrary order, replayed, or mutated
//! - Headers are rewritten with arbitrary counters
//!
//! # Invariants
//!
//! - Genuine messages decrypt to what was sent, at most once
//! - Mutated messages never decrypt
//! - A rejected message leaves the receiving state unchanged: the next
//!   genuine message still decrypts

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quiver_core::{
    AliceParameters, BobParameters, SessionConfig, SessionError, SessionState, SignalMessage,
    initialize_alice_session, initialize_bob_session,
};
use quiver_crypto::{IdentityKeyPair, KeyPair};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Alice encrypts into her outbox
    AliceSends { plaintext: Vec<u8> },
    /// Bob encrypts into his outbox
    BobSends { plaintext: Vec<u8> },
    /// Deliver a message from Alice's outbox to Bob
    DeliverToBob { slot: u8 },
    /// Deliver a message from Bob's outbox to Alice
    DeliverToAlice { slot: u8 },
    /// Deliver a mutated copy of one of Alice's messages
    Mutate { slot: u8, position: u16, flip: u8 },
    /// Deliver one of Alice's messages with a rewritten counter
    Relabel { slot: u8, counter: u32, previous_counter: u32 },
}

struct Sent {
    message: SignalMessage,
    plaintext: Vec<u8>,
    delivered: bool,
}

const MAX_OPERATIONS: usize = 64;

fuzz_target!(|scenario: Scenario| {
    let mut rng = ChaCha20Rng::seed_from_u64(scenario.seed);
    let (mut alice, mut bob) = pair(&mut rng);
    let config = SessionConfig::default();

    let mut alice_outbox: Vec<Sent> = Vec::new();
    let mut bob_outbox: Vec<Sent> = Vec::new();

    for operation in scenario.operations.into_iter().take(MAX_OPERATIONS) {
        match operation {
            Operation::AliceSends { plaintext } => {
                let message = alice.encrypt(&plaintext, &mut rng).expect("initiator can always send");
                alice_outbox.push(Sent { message, plaintext, delivered: false });
            },
            Operation::BobSends { plaintext } => {
                // Bob has no sending chain until he has heard from Alice.
                if let Ok(message) = bob.encrypt(&plaintext, &mut rng) {
                    bob_outbox.push(Sent { message, plaintext, delivered: false });
                }
            },
            Operation::DeliverToBob { slot } => deliver(&mut bob, &mut alice_outbox, slot, &config),
            Operation::DeliverToAlice { slot } => {
                deliver(&mut alice, &mut bob_outbox, slot, &config);
            },
            Operation::Mutate { slot, position, flip } => {
                let Some(sent) = pick(&alice_outbox, slot) else { continue };
                if flip == 0 {
                    continue;
                }
                let mut ciphertext = sent.message.ciphertext().to_vec();
                let index = usize::from(position) % ciphertext.len();
                ciphertext[index] ^= flip;
                let mutated = SignalMessage::new(
                    *sent.message.ratchet_key(),
                    sent.message.counter(),
                    sent.message.previous_counter(),
                    ciphertext,
                );
                reject_unchanged(&mut bob, &mutated, &config);
            },
            Operation::Relabel { slot, counter, previous_counter } => {
                let Some(sent) = pick(&alice_outbox, slot) else { continue };
                if counter == sent.message.counter()
                    && previous_counter == sent.message.previous_counter()
                {
                    continue;
                }
                let relabeled = SignalMessage::new(
                    *sent.message.ratchet_key(),
                    counter,
                    previous_counter,
                    sent.message.ciphertext().to_vec(),
                );
                reject_unchanged(&mut bob, &relabeled, &config);
            },
        }
    }
});

fn pair(rng: &mut ChaCha20Rng) -> (SessionState, SessionState) {
    let alice_identity = IdentityKeyPair::generate(rng);
    let bob_identity = IdentityKeyPair::generate(rng);
    let bob_signed = KeyPair::generate(rng);
    let alice_base = KeyPair::generate(rng);

    let alice = initialize_alice_session(
        &AliceParameters {
            our_identity_key_pair: &alice_identity,
            our_base_key_pair: &alice_base,
            their_identity_key: bob_identity.identity_key(),
            their_signed_pre_key: bob_signed.public_key,
            their_one_time_pre_key: None,
            their_ratchet_key: bob_signed.public_key,
        },
        rng,
    )
    .expect("fresh keys agree");

    let bob = initialize_bob_session(&BobParameters {
        our_identity_key_pair: &bob_identity,
        our_signed_pre_key_pair: &bob_signed,
        our_one_time_pre_key_pair: None,
        our_ratchet_key_pair: &bob_signed,
        their_identity_key: alice_identity.identity_key(),
        their_base_key: alice_base.public_key,
    })
    .expect("fresh keys agree");

    (alice, bob)
}

fn pick(outbox: &[Sent], slot: u8) -> Option<&Sent> {
    if outbox.is_empty() {
        return None;
    }
    outbox.get(usize::from(slot) % outbox.len())
}

fn deliver(receiver: &mut SessionState, outbox: &mut [Sent], slot: u8, config: &SessionConfig) {
    if outbox.is_empty() {
        return;
    }
    let index = usize::from(slot) % outbox.len();
    let sent = &mut outbox[index];

    match receiver.decrypt(&sent.message, config) {
        Ok(plaintext) => {
            assert!(!sent.delivered, "message decrypted twice");
            assert_eq!(plaintext, sent.plaintext);
            sent.delivered = true;
        },
        // Replays, plus late messages whose key or whole chain was evicted.
        Err(SessionError::DuplicateOrOldMessage { .. } | SessionError::AuthenticationFailed) => {},
        Err(err) => panic!("unexpected error for genuine message: {err}"),
    }
}

fn reject_unchanged(receiver: &mut SessionState, message: &SignalMessage, config: &SessionConfig) {
    let before = format!("{receiver:?}");
    let skipped = receiver.skipped_key_count();
    assert!(receiver.decrypt(message, config).is_err(), "altered message decrypted");
    assert_eq!(receiver.skipped_key_count(), skipped);
    assert_eq!(format!("{receiver:?}"), before);
}
