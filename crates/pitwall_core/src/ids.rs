//! Numeric id allocation for rows created on any replica.
//!
//! Ids pack `(millis << 22) | (node << 12) | sequence`. The 10-bit node comes
//! from the store's device id, so two devices creating rows while offline do
//! not hand out the same key.

use parking_lot::Mutex;
use pitwall_protocol::Timestamp;
use uuid::Uuid;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const NODE_MASK: i64 = (1 << NODE_BITS) - 1;

/// Hands out unique ids for one store.
#[derive(Debug)]
pub struct IdGenerator {
    node: i64,
    state: Mutex<(i64, i64)>,
}

impl IdGenerator {
    /// Creates a generator for `device`.
    pub fn new(device: Uuid) -> Self {
        Self::resume(device, 0)
    }

    /// Creates a generator that never issues ids below `floor`.
    pub fn resume(device: Uuid, floor: i64) -> Self {
        let bytes = device.as_bytes();
        let node = ((i64::from(bytes[14]) << 8) | i64::from(bytes[15])) & NODE_MASK;
        Self {
            node,
            state: Mutex::new((floor.max(0) >> (NODE_BITS + SEQUENCE_BITS), MAX_SEQUENCE)),
        }
    }

    /// The node bits embedded in every id.
    pub fn node(&self) -> i64 {
        self.node
    }

    /// Returns a fresh id for a row created at `now`.
    pub fn next(&self, now: Timestamp) -> i64 {
        let mut state = self.state.lock();
        let (last_millis, last_seq) = *state;
        let mut millis = now.as_millis().max(last_millis);
        let seq = if millis == last_millis {
            if last_seq >= MAX_SEQUENCE {
                millis += 1;
                0
            } else {
                last_seq + 1
            }
        } else {
            0
        };
        *state = (millis, seq);
        (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_within_one_millisecond() {
        let ids = IdGenerator::new(Uuid::new_v4());
        let now = Timestamp::from_millis(1_000);
        let issued: HashSet<i64> = (0..10_000).map(|_| ids.next(now)).collect();
        assert_eq!(issued.len(), 10_000);
    }

    #[test]
    fn different_nodes_do_not_collide() {
        let a = IdGenerator::new(Uuid::from_u128(1));
        let b = IdGenerator::new(Uuid::from_u128(2));
        let now = Timestamp::from_millis(77);
        assert_ne!(a.next(now), b.next(now));
    }

    #[test]
    fn resume_skips_past_floor() {
        let device = Uuid::from_u128(9);
        let first = IdGenerator::new(device);
        let issued = first.next(Timestamp::from_millis(5_000));
        let resumed = IdGenerator::resume(device, issued);
        assert!(resumed.next(Timestamp::from_millis(10)) > issued);
    }

    #[test]
    fn ids_increase_with_time() {
        let ids = IdGenerator::new(Uuid::from_u128(3));
        let a = ids.next(Timestamp::from_millis(10));
        let b = ids.next(Timestamp::from_millis(11));
        assert!(b > a);
    }
}
