//! The keystore: a ring of key slots plus cursors, guarded by a single
//! readers/writer lock per instance.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use constant_time_eq::constant_time_eq;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::derive::{derive_media_key, derive_session_key, generate_iv, hash_fresh_key};
use crate::error::{KeystoreError, Result};
use crate::listener::{KeystoreSnapshot, Listener, ListenerId};
use crate::slot::{KeySlot, KEY_LEN};

type Callback = Arc<dyn Fn(&KeystoreSnapshot) + Send + Sync>;

/// Ring capacity. Requests more than `NUM_KEYS - 1` generations ahead of
/// `head` are refused to bound per-call derivation work.
pub const NUM_KEYS: usize = 4;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn normalize_key(key: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let n = key.len().min(KEY_LEN);
    out[..n].copy_from_slice(&key[..n]);
    out
}

struct KeystoreInner {
    slots: [KeySlot; NUM_KEYS],
    current: usize,
    head: usize,
    init: bool,
    has_keys: bool,
    salt: Option<Vec<u8>>,
    update_ts: u64,
    decrypt_attempted: bool,
    decrypt_successful: bool,
    listeners: Vec<Listener>,
}

impl KeystoreInner {
    fn new() -> Self {
        Self {
            slots: Default::default(),
            current: 0,
            head: 0,
            init: false,
            has_keys: false,
            salt: None,
            update_ts: now_ms(),
            decrypt_attempted: false,
            decrypt_successful: false,
            listeners: Vec::new(),
        }
    }

    fn salt(&self) -> &[u8] {
        self.salt.as_deref().unwrap_or(&[])
    }

    fn snapshot(&self) -> KeystoreSnapshot {
        KeystoreSnapshot {
            current_index: self.slots[self.current].index,
            update_ts: self.update_ts,
        }
    }

    /// Ratchet the ring forward, one HKDF step at a time, until
    /// `slots[head].index == target`. Requires the head slot to already be
    /// occupied.
    fn ratchet_to_index(&mut self, target: u32) -> Result<()> {
        let salt = self.salt.clone().unwrap_or_default();
        while self.slots[self.head].index < target {
            let n = (self.head + 1) % NUM_KEYS;
            let next_index = self.slots[self.head].index + 1;
            let session_key = derive_session_key(&self.slots[self.head].session_key, &salt)?;
            let media_key = derive_media_key(&session_key, &salt)?;

            self.slots[n].clear();
            self.slots[n].session_key = session_key;
            self.slots[n].media_key = media_key;
            self.slots[n].index = next_index;
            self.slots[n].occupied = true;
            self.head = n;
        }
        Ok(())
    }

    /// Snapshot the state and clone out the listener callbacks while the
    /// write lock is held, so they can be invoked after it is released.
    fn fire_listeners_locked(&self) -> (KeystoreSnapshot, Vec<Callback>) {
        let snapshot = self.snapshot();
        let callbacks = self.listeners.iter().map(|l| l.callback.clone()).collect();
        (snapshot, callbacks)
    }
}

fn invoke_listeners(callbacks: &[Callback], snapshot: &KeystoreSnapshot) {
    for callback in callbacks {
        callback(snapshot);
    }
}

impl Drop for KeystoreInner {
    /// Overwrites the whole structure with zeros before it is returned to
    /// the allocator — the slots already zeroise themselves via
    /// `KeySlot`'s `ZeroizeOnDrop`, so only the salt needs an explicit wipe
    /// here.
    fn drop(&mut self) {
        if let Some(mut salt) = self.salt.take() {
            salt.zeroize();
        }
    }
}

/// A per-call media keystore: the current and upcoming media-encryption
/// keys, ratcheted forward through a key-index space and derived with
/// HKDF-SHA512.
///
/// Thread-safe: every operation takes the internal readers/writer lock
/// itself. Listener callbacks must not call back into the keystore and
/// must not block (see module docs on [`crate::listener`]).
pub struct Keystore {
    inner: RwLock<KeystoreInner>,
}

impl Default for Keystore {
    fn default() -> Self {
        Self::new()
    }
}

impl Keystore {
    /// Create an empty keystore: no salt, no keys, no listeners.
    pub fn new() -> Self {
        Keystore {
            inner: RwLock::new(KeystoreInner::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, KeystoreInner> {
        self.inner.read().expect("keystore lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeystoreInner> {
        self.inner.write().expect("keystore lock poisoned")
    }

    /// Zeroise all slots and clear `current`, `head`, `init`, `has_keys`,
    /// and the decrypt-state latches. Salt and listeners survive.
    pub fn reset_keys(&self) {
        debug!("keystore: reset_keys");
        let mut inner = self.write();
        for slot in inner.slots.iter_mut() {
            slot.clear();
        }
        inner.current = 0;
        inner.head = 0;
        inner.init = false;
        inner.has_keys = false;
        inner.decrypt_attempted = false;
        inner.decrypt_successful = false;
    }

    /// As [`Self::reset_keys`], but also frees the salt.
    pub fn reset(&self) {
        debug!("keystore: reset");
        let mut inner = self.write();
        for slot in inner.slots.iter_mut() {
            slot.clear();
        }
        inner.current = 0;
        inner.head = 0;
        inner.init = false;
        if let Some(mut salt) = inner.salt.take() {
            salt.zeroize();
        }
        inner.has_keys = false;
        inner.decrypt_attempted = false;
        inner.decrypt_successful = false;
    }

    /// Replace the HKDF salt used for all future session/media derivation.
    pub fn set_salt(&self, salt: &[u8]) -> Result<()> {
        debug!(len = salt.len(), "keystore: set_salt");
        let mut inner = self.write();
        if let Some(mut old) = inner.salt.take() {
            old.zeroize();
        }
        inner.salt = Some(salt.to_vec());
        inner.update_ts = now_ms();
        Ok(())
    }

    /// Admit a session key tagged with `index`. See module-level docs for
    /// the full ratchet/retransmit/correction rules.
    pub fn set_session_key(&self, index: u32, key: &[u8]) -> Result<()> {
        let key = normalize_key(key);
        let mut inner = self.write();

        if inner.init && index < inner.slots[inner.current].index {
            debug!(index, current = inner.slots[inner.current].index, "keystore: stale session key ignored");
            return Err(KeystoreError::Already);
        }

        for slot in 0..NUM_KEYS {
            if inner.slots[slot].occupied && inner.slots[slot].index == index {
                if constant_time_eq(&inner.slots[slot].session_key, &key) {
                    return Err(KeystoreError::Already);
                }
                warn!(index, "keystore: session key changed, overwriting");
                inner.slots[slot].session_key = key;
                let salt = inner.salt().to_vec();
                let media_key = derive_media_key(&inner.slots[slot].session_key, &salt)?;
                inner.slots[slot].media_key = media_key;
                inner.update_ts = now_ms();
                return Ok(());
            }
        }

        let dest = if inner.head != inner.current
            && inner.slots[inner.head].occupied
            && index < inner.slots[inner.head].index
        {
            warn!(
                index,
                head = inner.slots[inner.head].index,
                "keystore: key older than head, truncating head-side tail"
            );
            (inner.current + 1) % NUM_KEYS
        } else {
            (inner.head + 1) % NUM_KEYS
        };

        inner.slots[dest].clear();
        inner.slots[dest].session_key = key;
        inner.slots[dest].index = index;

        let mut fired = None;
        if !inner.init {
            inner.current = dest;
            inner.init = true;
            fired = Some(inner.fire_listeners_locked());
        }
        inner.head = dest;

        let salt = inner.salt().to_vec();
        let media_key = derive_media_key(&inner.slots[dest].session_key, &salt)?;
        inner.slots[dest].media_key = media_key;

        inner.slots[dest].occupied = true;
        inner.has_keys = true;
        inner.update_ts = now_ms();
        debug!(index, dest, "keystore: set_session_key admitted");

        drop(inner);
        if let Some((snapshot, callbacks)) = fired {
            invoke_listeners(&callbacks, &snapshot);
        }
        Ok(())
    }

    /// Convenience wrapper: hash `key` with `salt` via HKDF(info="cs") and
    /// feed the result through [`Self::set_session_key`].
    pub fn set_fresh_session_key(&self, index: u32, key: &[u8], salt: &[u8]) -> Result<()> {
        let mut hashed = hash_fresh_key(key, salt)?;
        let result = self.set_session_key(index, &hashed);
        hashed.zeroize();
        result
    }

    /// Return `(index, key)` for the slot the sender should use right now.
    pub fn get_current_session_key(&self) -> Result<(u32, [u8; KEY_LEN])> {
        let inner = self.read();
        let slot = &inner.slots[inner.current];
        if slot.occupied {
            Ok((slot.index, slot.session_key))
        } else {
            Err(KeystoreError::NotFound)
        }
    }

    /// Preview the upcoming (head) session key, if one has been
    /// pre-admitted and rotation hasn't consumed it yet.
    pub fn get_next_session_key(&self) -> Result<(u32, [u8; KEY_LEN])> {
        let inner = self.read();
        if inner.head != inner.current && inner.slots[inner.head].occupied {
            let slot = &inner.slots[inner.head];
            Ok((slot.index, slot.session_key))
        } else {
            Err(KeystoreError::NotFound)
        }
    }

    /// Advance `current` to `head`, ratcheting forward by one generation
    /// first if no pre-admitted "next" key exists.
    pub fn rotate(&self) -> Result<()> {
        let mut inner = self.write();
        debug!(head = inner.head, current = inner.current, "keystore: rotate");

        if inner.current == inner.head {
            let target = inner.slots[inner.head].index + 1;
            inner.ratchet_to_index(target)?;
        }
        inner.current = inner.head;

        let (snapshot, callbacks) = inner.fire_listeners_locked();
        drop(inner);
        invoke_listeners(&callbacks, &snapshot);
        Ok(())
    }

    /// Fetch the media key for `index`, ratcheting forward on demand if
    /// necessary. Requests more than `NUM_KEYS - 1` ahead of `head` are
    /// refused.
    pub fn get_media_key(&self, index: u32) -> Result<[u8; KEY_LEN]> {
        let mut inner = self.write();

        for slot in 0..NUM_KEYS {
            if inner.slots[slot].occupied && inner.slots[slot].index == index {
                let key = inner.slots[slot].media_key;
                if index > inner.slots[inner.current].index {
                    inner.current = slot;
                }
                return Ok(key);
            }
        }

        let head_index = inner.slots[inner.head].index;
        if inner.slots[inner.head].occupied
            && index > head_index
            && index < head_index + NUM_KEYS as u32
        {
            inner.ratchet_to_index(index)?;
            let key = inner.slots[inner.head].media_key;
            if index > inner.slots[inner.current].index {
                inner.current = inner.head;
            }
            return Ok(key);
        }

        Err(KeystoreError::NotFound)
    }

    /// Derive a stream IV, independent of keystore state (other than the
    /// choice of hash, which is fixed to SHA-512).
    pub fn generate_iv(client_id: &[u8], stream_name: &[u8], out: &mut [u8]) -> Result<()> {
        generate_iv(client_id, stream_name, out)
    }

    /// True while any key has been admitted since the last reset.
    pub fn has_keys(&self) -> bool {
        self.write().has_keys
    }

    pub fn set_decrypt_attempted(&self) {
        debug!("keystore: decrypt_attempted");
        self.write().decrypt_attempted = true;
    }

    pub fn set_decrypt_successful(&self) {
        debug!("keystore: decrypt_successful");
        self.write().decrypt_successful = true;
    }

    pub fn get_decrypt_states(&self) -> (bool, bool) {
        let inner = self.write();
        (inner.decrypt_attempted, inner.decrypt_successful)
    }

    /// The highest generation index known (`slots[head].index`). Callers
    /// must check [`Self::has_keys`] to disambiguate "0 admitted" from "the
    /// first admitted index was 0".
    pub fn max_key_index(&self) -> u32 {
        let inner = self.read();
        inner.slots[inner.head].index
    }

    /// The current generation index and the timestamp of the last
    /// state-changing admission.
    pub fn get_current(&self) -> Result<(u32, u64)> {
        let inner = self.read();
        if inner.slots[inner.current].occupied {
            Ok((inner.slots[inner.current].index, inner.update_ts))
        } else {
            Err(KeystoreError::NotFound)
        }
    }

    /// Register a rotation listener, fired (after the triggering
    /// operation's lock is released) on first-key admission and on
    /// explicit [`Self::rotate`].
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&KeystoreSnapshot) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let mut inner = self.write();
        inner.listeners.push(Listener {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a listener by the id returned from [`Self::add_listener`].
    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.write();
        inner.listeners.retain(|l| l.id != id);
    }
}
