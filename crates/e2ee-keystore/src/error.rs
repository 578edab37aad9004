//! Error taxonomy for keystore operations.

use thiserror::Error;

/// Errors returned by [`crate::Keystore`] operations.
///
/// `Already` and `NotFound` are not failures in the caller's ledger — they
/// are signals to skip (a stale or duplicate admission, a miss outside the
/// ratchet window). Callers should not log them at error level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    /// Null/empty argument or an HKDF failure on a malformed input.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Allocation failure.
    #[error("out of memory")]
    Oom,

    /// Idempotent rejection: a stale index or a byte-identical re-admission.
    #[error("already up to date")]
    Already,

    /// Requested index not present and out of the ratchet window, or the
    /// current slot is not yet initialised.
    #[error("not found")]
    NotFound,

    /// HKDF derivation failed while admitting or ratcheting a key; the slot
    /// is left unoccupied to preserve the keystore's invariants.
    #[error("internal derivation failure: {0}")]
    FatalInternal(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;
