//! Fuzz target for wire envelope parsing
//!
//! Feeds arbitrary bytes to every envelope decoder to find:
//! - Parser panics
//! - Length fields that over-read or under-read
//! - Inputs that parse but do not serialize back to themselves
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quiver_core::{
    PreKeySignalMessage, SenderKeyDistributionMessage, SenderKeyMessage, SignalMessage,
};

fuzz_target!(|data: &[u8]| {
    // Every layout is fixed, so anything that parses must re-encode exactly.
    if let Ok(message) = SignalMessage::deserialize(data) {
        assert_eq!(message.serialize(), data);
    }
    if let Ok(message) = PreKeySignalMessage::deserialize(data) {
        assert_eq!(message.serialize(), data);
    }
    if let Ok(message) = SenderKeyMessage::deserialize(data) {
        assert_eq!(message.serialize(), data);
    }
    if let Ok(message) = SenderKeyDistributionMessage::deserialize(data) {
        assert_eq!(message.serialize(), data);
    }
});
