//! Double Ratchet session state machine.
//!
//! Each side holds a root key, one DH ratchet key pair, at most one sending
//! chain, and a short list of receiving chains (one per remote ratchet key
//! seen recently).
//!
//! ```text
//!            receive (new remote key)            send (no sending chain)
//! RootKey ──► create_chain(remote, ours) ──► RootKey' ──► create_chain(remote, fresh) ──► RootKey''
//!                    │                                            │
//!                    ▼                                            ▼
//!             receiving chain                               sending chain
//! ```
//!
//! The sending half of a DH step is deferred until the next encrypt, so two
//! parties that have exchanged one message each hold byte-equal root keys.

mod record;
mod state;

pub use record::SessionRecord;
pub use state::{PendingPreKey, SessionState};
