//! Property-based test generators using proptest.
//!
//! Queue operations refer to karts, teams and entries by index so a single
//! strategy works against any seeded [`RaceDay`](crate::RaceDay).

use pitwall_protocol::{ChangeSet, Kart, KartId, RaceId, Record, Team, TeamId, Timestamp};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// One step of a generated queue workload.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOp {
    /// Queue `karts[kart]` for `teams[team]` on `line`.
    Add {
        /// Kart index.
        kart: usize,
        /// Team index.
        team: usize,
        /// Line number, may be out of range.
        line: u32,
    },
    /// Remove the `pick`-th live entry (modulo the live count).
    Remove {
        /// Entry index.
        pick: usize,
        /// Team index to hand the kart to.
        assign_to: Option<usize>,
    },
    /// Empty `line`.
    Clear {
        /// Line number, may be out of range.
        line: u32,
    },
    /// Advance the clock.
    Tick {
        /// Milliseconds to advance.
        millis: i64,
    },
}

/// Strategy for one queue operation.
///
/// Line numbers range over `0..=lines + 1` so out-of-range lines are hit too.
pub fn queue_op_strategy(lines: u32, karts: usize, teams: usize) -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => (0..karts, 0..teams, 0..=lines + 1)
            .prop_map(|(kart, team, line)| QueueOp::Add { kart, team, line }),
        2 => (any::<usize>(), prop::option::of(0..teams))
            .prop_map(|(pick, assign_to)| QueueOp::Remove { pick, assign_to }),
        1 => (0..=lines + 1).prop_map(|line| QueueOp::Clear { line }),
        1 => (1i64..50).prop_map(|millis| QueueOp::Tick { millis }),
    ]
}

/// Strategy for a queue workload of up to `max_len` operations.
pub fn queue_ops_strategy(
    lines: u32,
    karts: usize,
    teams: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<QueueOp>> {
    prop::collection::vec(queue_op_strategy(lines, karts, teams), 1..max_len)
}

/// Strategy for sync timestamps in a narrow window, so collisions between
/// generated records are common.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1i64..64).prop_map(Timestamp::from_millis)
}

/// Strategy for team rows keyed `1..=keys`, live or tombstoned.
pub fn team_record_strategy(keys: i64) -> impl Strategy<Value = Record<Team>> {
    (
        1..=keys,
        timestamp_strategy(),
        prop::option::of("[A-Z][a-z]{2,8}"),
    )
        .prop_map(|(key, at, name)| match name {
            Some(name) => Record::active(TeamId(key), Team { name }, at),
            None => Record::tombstone(TeamId(key), at),
        })
}

/// Strategy for kart rows of `race` keyed `1..=keys`, live or tombstoned.
pub fn kart_record_strategy(race: RaceId, keys: i64) -> impl Strategy<Value = Record<Kart>> {
    (
        1..=keys,
        timestamp_strategy(),
        prop::option::of(1u8..=5),
    )
        .prop_map(move |(key, at, status)| match status {
            Some(status) => Record::active(
                KartId(key),
                Kart {
                    race_id: race,
                    status,
                    team_id: None,
                },
                at,
            ),
            None => Record::tombstone(KartId(key), at),
        })
}

/// Strategy for an inbound change-set of teams and karts of `race`.
///
/// Like a server delta, it holds at most one row per key.
pub fn change_set_strategy(race: RaceId) -> impl Strategy<Value = ChangeSet> {
    (
        prop::collection::vec(team_record_strategy(4), 0..8),
        prop::collection::vec(kart_record_strategy(race, 4), 0..8),
    )
        .prop_map(|(teams, karts)| {
            let teams: BTreeMap<_, _> = teams.into_iter().map(|r| (r.key, r)).collect();
            let karts: BTreeMap<_, _> = karts.into_iter().map(|r| (r.key, r)).collect();
            let mut changes: ChangeSet = teams.into_values().collect();
            changes.extend(karts.into_values());
            changes
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_queue_op_strategy_stays_in_bounds() {
        let mut runner = TestRunner::default();
        let strategy = queue_op_strategy(2, 5, 3);

        for _ in 0..100 {
            match strategy.new_tree(&mut runner).unwrap().current() {
                QueueOp::Add { kart, team, line } => {
                    assert!(kart < 5);
                    assert!(team < 3);
                    assert!(line <= 3);
                }
                QueueOp::Remove { assign_to, .. } => assert!(assign_to.map_or(true, |t| t < 3)),
                QueueOp::Clear { line } => assert!(line <= 3),
                QueueOp::Tick { millis } => assert!(millis > 0),
            }
        }
    }

    #[test]
    fn test_change_set_strategy_targets_race() {
        let mut runner = TestRunner::default();
        let strategy = change_set_strategy(RaceId(9));

        for _ in 0..50 {
            let changes = strategy.new_tree(&mut runner).unwrap().current();
            for kart in changes.of::<Kart>() {
                if let Some(body) = kart.body() {
                    assert_eq!(body.race_id, RaceId(9));
                }
            }
            assert!(changes.teams.len() <= 4);
            assert!(changes.karts.len() <= 4);
        }
    }
}
