//! Property tests for the ring/cursor invariants.

use proptest::prelude::*;

use crate::keystore::Keystore;

fn key_from_byte(b: u8) -> [u8; 32] {
    [b; 32]
}

proptest! {
    /// P3: for a strictly increasing, distinct-key admission sequence that
    /// stays within the ring's N-1 gap bound (invariant 3), current stays
    /// at the first admitted index until rotate is called, and
    /// max_key_index tracks the most recently admitted index.
    #[test]
    fn admitting_increasing_indices_keeps_current_fixed(
        deltas in proptest::collection::vec(1u32..5, 1..(crate::keystore::NUM_KEYS)),
        first in 0u32..1000,
    ) {
        let ks = Keystore::new();
        ks.set_salt(&[0xAB; 8]).unwrap();

        let mut index = first;
        ks.set_session_key(index, &key_from_byte(1)).unwrap();
        let first_index = index;

        for (i, delta) in deltas.iter().enumerate() {
            index += delta;
            ks.set_session_key(index, &key_from_byte((i as u8).wrapping_add(2))).unwrap();

            let (current_index, _) = ks.get_current_session_key().unwrap();
            prop_assert_eq!(current_index, first_index);
            prop_assert_eq!(ks.max_key_index(), index);
        }
    }

    /// P4: admitting an index older than current is rejected as Already
    /// and leaves state untouched.
    #[test]
    fn stale_admission_is_noop(
        base in 10u32..1000,
        stale_delta in 1u32..10,
    ) {
        let ks = Keystore::new();
        ks.set_salt(&[0x01; 4]).unwrap();
        ks.set_session_key(base, &key_from_byte(7)).unwrap();
        ks.set_session_key(base + 1, &key_from_byte(8)).unwrap();
        ks.rotate().unwrap();

        let before = ks.get_current().unwrap();
        let max_before = ks.max_key_index();

        let stale = base.saturating_sub(stale_delta);
        prop_assume!(stale < before.0);
        let result = ks.set_session_key(stale, &key_from_byte(9));

        prop_assert!(result.is_err());
        prop_assert_eq!(ks.get_current().unwrap(), before);
        prop_assert_eq!(ks.max_key_index(), max_before);
    }

    /// P8: get_media_key can ratchet forward up to NUM_KEYS - 1 steps past
    /// head, but not NUM_KEYS or more.
    #[test]
    fn media_key_ratchet_window_is_bounded(base in 0u32..10_000) {
        let ks = Keystore::new();
        ks.set_salt(&[0x02; 4]).unwrap();
        ks.set_session_key(base, &key_from_byte(3)).unwrap();

        for d in 1..crate::keystore::NUM_KEYS as u32 {
            prop_assert!(ks.get_media_key(base + d).is_ok());
        }

        // Fresh keystore, far jump should fail (>= NUM_KEYS ahead of head).
        let ks2 = Keystore::new();
        ks2.set_salt(&[0x02; 4]).unwrap();
        ks2.set_session_key(base, &key_from_byte(3)).unwrap();
        prop_assert!(ks2.get_media_key(base + crate::keystore::NUM_KEYS as u32).is_err());
    }
}
