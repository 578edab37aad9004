//! Rotation listener registry.
//!
//! Listeners are fired when `current` advances to a newly initialised slot
//! (first-key admission) or on an explicit `rotate`. They are invoked with
//! a snapshot of the state captured at the moment of transition, never
//! while the keystore's lock is held — a listener must not call back into
//! the keystore or block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque handle returned by `add_listener`, used to remove it later.
/// Stands in for the C API's `(fn-pointer, arg)` identity, where removal
/// was by `arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State of the keystore captured at the instant `current` transitioned,
/// passed to every fired listener.
#[derive(Debug, Clone, Copy)]
pub struct KeystoreSnapshot {
    pub current_index: u32,
    pub update_ts: u64,
}

pub(crate) struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) callback: Arc<dyn Fn(&KeystoreSnapshot) + Send + Sync>,
}
