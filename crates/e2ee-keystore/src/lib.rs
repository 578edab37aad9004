//! Group-call end-to-end media keystore.
//!
//! Holds the current and upcoming media-encryption keys for a call, ratchets
//! forward through a key-index space with HKDF-SHA512, and notifies
//! subscribers when the "current" key rotates. Does not perform AEAD
//! encryption/decryption, transport keys between peers, or persist state —
//! see the crate-level docs on [`Keystore`] for the exact contract.

#![forbid(unsafe_code)]

pub mod derive;
pub mod error;
pub mod keystore;
pub mod listener;
pub mod slot;

#[cfg(test)]
mod proptests;

pub use error::{KeystoreError, Result};
pub use keystore::{Keystore, NUM_KEYS};
pub use listener::{KeystoreSnapshot, ListenerId};
pub use slot::KEY_LEN;
