//! HKDF-SHA512 derivation helpers.
//!
//! All session/media key derivation and IV generation in the keystore
//! funnels through this module so the three fixed `info` strings and the
//! choice of hash stay in one place.

use hkdf::Hkdf;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::error::{KeystoreError, Result};
use crate::slot::KEY_LEN;

/// `info` for ratcheting one session key into the next.
pub const SESSION_KEY_INFO: &[u8] = b"session_key";
/// `info` for deriving a media key from a session key.
pub const MEDIA_KEY_INFO: &[u8] = b"media_key";
/// `info` for hashing externally supplied key material in
/// `set_fresh_session_key`.
pub const FRESH_KEY_INFO: &[u8] = b"cs";

fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|_| KeystoreError::FatalInternal("HKDF expand failed".into()))
}

/// Ratchet `prev` forward into the next session key: HKDF(prev, salt,
/// "session_key").
pub fn derive_session_key(prev: &[u8; KEY_LEN], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut out = [0u8; KEY_LEN];
    hkdf_expand(prev, salt, SESSION_KEY_INFO, &mut out)?;
    Ok(out)
}

/// Derive the media key for a session key: HKDF(session_key, salt,
/// "media_key").
pub fn derive_media_key(session_key: &[u8; KEY_LEN], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut out = [0u8; KEY_LEN];
    hkdf_expand(session_key, salt, MEDIA_KEY_INFO, &mut out)?;
    Ok(out)
}

/// Hash externally supplied raw key material into a session key:
/// HKDF(raw_key, salt, "cs"). The returned buffer is the caller's to feed
/// into `set_session_key`; callers must zeroise it once consumed.
pub fn hash_fresh_key(raw_key: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut out = [0u8; KEY_LEN];
    hkdf_expand(raw_key, salt, FRESH_KEY_INFO, &mut out)?;
    Ok(out)
}

/// Derive a stream IV: HKDF(client_id, stream_name, info = empty,
/// out_len). Pure function of its inputs — reproducible outside the
/// keystore given the same identifiers.
pub fn generate_iv(client_id: &[u8], stream_name: &[u8], out: &mut [u8]) -> Result<()> {
    out.zeroize();
    hkdf_expand(client_id, stream_name, &[], out)
}
