//! Fuzz target for stored record decoding
//!
//! Session and sender-key records are CBOR. A store that was corrupted or
//! tampered with must produce an error, never a panic or a runaway
//! allocation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quiver_core::{SenderKeyRecord, SessionRecord};

fuzz_target!(|data: &[u8]| {
    let _ = SessionRecord::deserialize(data);
    let _ = SenderKeyRecord::deserialize(data);
});
