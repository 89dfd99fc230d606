//! X3DH handshake and pre-key material.

mod bundle;
mod x3dh;

pub use bundle::{PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
pub use x3dh::{
    AliceParameters, BobParameters, initialize_alice_session, initialize_bob_session,
    process_pre_key_bundle,
};
