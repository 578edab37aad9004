//! The key slot value type stored in the keystore's ring.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32-byte opaque secret used throughout the keystore.
pub const KEY_LEN: usize = 32;

/// One position in the keystore's ring buffer.
///
/// Holds a session key, the media key derived from it, the generation
/// `index` assigned by the signalling layer, and whether the slot is
/// currently occupied. `session_key`/`media_key` are zeroised whenever the
/// slot transitions from occupied to unused (invariant 6 of the keystore
/// contract) and on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeySlot {
    pub session_key: [u8; KEY_LEN],
    pub media_key: [u8; KEY_LEN],
    #[zeroize(skip)]
    pub index: u32,
    #[zeroize(skip)]
    pub occupied: bool,
}

impl Default for KeySlot {
    fn default() -> Self {
        Self {
            session_key: [0u8; KEY_LEN],
            media_key: [0u8; KEY_LEN],
            index: 0,
            occupied: false,
        }
    }
}

impl KeySlot {
    /// Wipe the key material and mark the slot unused, preserving no trace
    /// of the prior generation's keys.
    pub fn clear(&mut self) {
        self.session_key.zeroize();
        self.media_key.zeroize();
        self.index = 0;
        self.occupied = false;
    }
}
