//! Fuzz target for the sender-key ratchet
//!
//! Drives one sender and two receivers installed from the same distribution
//! message through arbitrary encrypt and delivery sequences.
//!
//! # Strategy
//!
//! - Arbitrary plaintexts and delivery orders
//! - Replays of already delivered messages
//! - Byte flips anywhere in the serialized message
//! - Late receivers joining from a distribution message mid-chain
//!
//! # Invariants
//!
//! - Every genuine message verifies and decrypts to what was sent, at most
//!   once per receiver
//! - Two receivers holding the same chain derive the same plaintext
//! - A flipped byte never yields a message that verifies and decrypts
//! - NEVER panic on any input

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quiver_core::{SenderKeyConfig, SenderKeyMessage, SenderKeyState, SessionError};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    distribution_id: u128,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    /// Sender encrypts a message
    Encrypt { plaintext: Vec<u8> },
    /// Deliver a message to the first receiver
    Deliver { slot: u8 },
    /// Deliver a message to the second receiver
    DeliverSecond { slot: u8 },
    /// Deliver a byte-flipped copy to the first receiver
    Flip { slot: u8, position: u16, mask: u8 },
    /// Install a third receiver from a fresh distribution message
    LateJoin,
}

struct Sent {
    message: SenderKeyMessage,
    plaintext: Vec<u8>,
    opened: [bool; 2],
}

const MAX_OPERATIONS: usize = 128;

fuzz_target!(|scenario: Scenario| {
    let mut rng = ChaCha20Rng::seed_from_u64(scenario.seed);
    let config = SenderKeyConfig::default();
    let distribution_id = scenario.distribution_id;

    let mut sender = SenderKeyState::generate(&mut rng);
    let distribution = sender.distribution_message(distribution_id);
    let mut receivers = [
        SenderKeyState::from_distribution(&distribution),
        SenderKeyState::from_distribution(&distribution),
    ];
    let mut late: Option<(u32, SenderKeyState)> = None;
    let mut outbox: Vec<Sent> = Vec::new();

    for operation in scenario.operations.into_iter().take(MAX_OPERATIONS) {
        match operation {
            Operation::Encrypt { plaintext } => {
                let message = sender.encrypt(distribution_id, &plaintext).expect("local state encrypts");
                assert!(message.verify_signature(sender.signing_key()));

                if let Some((joined_at, state)) = late.as_mut() {
                    assert!(message.iteration() >= *joined_at);
                    let opened = state.decrypt(&message, &config).expect("late joiner reads new messages");
                    assert_eq!(opened, plaintext);
                }
                outbox.push(Sent { message, plaintext, opened: [false; 2] });
            },
            Operation::Deliver { slot } => deliver(&mut receivers, 0, &mut outbox, slot, &config),
            Operation::DeliverSecond { slot } => {
                deliver(&mut receivers, 1, &mut outbox, slot, &config);
            },
            Operation::Flip { slot, position, mask } => {
                if outbox.is_empty() || mask == 0 {
                    continue;
                }
                let sent = &outbox[usize::from(slot) % outbox.len()];
                let mut bytes = sent.message.serialize();
                let index = usize::from(position) % bytes.len();
                bytes[index] ^= mask;

                let Ok(flipped) = SenderKeyMessage::deserialize(&bytes) else { continue };
                let verified = flipped.verify_signature(receivers[0].signing_key());
                assert!(!verified, "flipped message kept a valid signature");
            },
            Operation::LateJoin => {
                let distribution = sender.distribution_message(distribution_id);
                late = Some((distribution.iteration(), SenderKeyState::from_distribution(&distribution)));
            },
        }
    }
});

fn deliver(
    receivers: &mut [SenderKeyState; 2],
    which: usize,
    outbox: &mut [Sent],
    slot: u8,
    config: &SenderKeyConfig,
) {
    if outbox.is_empty() {
        return;
    }
    let index = usize::from(slot) % outbox.len();
    let sent = &mut outbox[index];
    let receiver = &mut receivers[which];

    assert!(sent.message.verify_signature(receiver.signing_key()));
    match receiver.decrypt(&sent.message, config) {
        Ok(plaintext) => {
            assert!(!sent.opened[which], "message decrypted twice");
            assert_eq!(plaintext, sent.plaintext);
            sent.opened[which] = true;
        },
        Err(SessionError::DuplicateOrOldMessage { .. }) => {
            assert!(sent.opened[which], "genuine message rejected before delivery");
        },
        Err(err) => panic!("unexpected error for genuine message: {err}"),
    }
}
