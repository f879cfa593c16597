//! Invariant assertions over a store.

use pitwall_core::{audit, Database, Violation};
use pitwall_protocol::{
    ChangeSet, Entity, Kart, KartId, PitlaneConfig, PitlaneCurrent, PitlaneEntryId,
    PitlaneHistory, Race, RaceTeam, Team, Timestamp,
};
use std::collections::BTreeMap;

/// Live queue entries of a store, in key order.
pub fn live_entries(db: &Database) -> Vec<(PitlaneEntryId, PitlaneCurrent)> {
    db.read(|t| {
        t.live_rows::<PitlaneCurrent>()
            .map(|(id, entry)| (id, entry.clone()))
            .collect()
    })
}

/// Panics unless every line is contiguous and within capacity, and no kart
/// holds more than one slot.
pub fn assert_queue_invariants(db: &Database) {
    let queue_violations: Vec<Violation> = db
        .read(audit)
        .into_iter()
        .filter(|v| {
            matches!(
                v,
                Violation::NonContiguousLine { .. }
                    | Violation::LineOverCapacity { .. }
                    | Violation::LineOutOfRange { .. }
                    | Violation::KartQueuedTwice { .. }
            )
        })
        .collect();
    assert!(
        queue_violations.is_empty(),
        "queue invariants broken: {queue_violations:?}"
    );

    let mut slots: BTreeMap<KartId, usize> = BTreeMap::new();
    for (_, entry) in live_entries(db) {
        *slots.entry(entry.kart_id).or_default() += 1;
    }
    let doubled: Vec<_> = slots.into_iter().filter(|(_, n)| *n > 1).collect();
    assert!(doubled.is_empty(), "karts in more than one slot: {doubled:?}");
}

/// Panics unless every entry of `before` that is no longer live in `db` has a
/// matching history row with `exitedAt >= enteredAt`.
///
/// Take `before` with [`live_entries`] right before a queue operation.
pub fn assert_exits_recorded(before: &[(PitlaneEntryId, PitlaneCurrent)], db: &Database) {
    db.read(|t| {
        for (id, entry) in before {
            if t.live::<PitlaneCurrent>(id).is_some() {
                continue;
            }
            let recorded = t.live_rows::<PitlaneHistory>().any(|(_, history)| {
                history.records_exit_of(entry) && history.exited_at >= history.entered_at
            });
            assert!(recorded, "entry {id} left the queue without history: {entry:?}");
        }
    });
}

/// Every row of a store, tombstones included.
pub fn snapshot(db: &Database) -> ChangeSet {
    db.changes_since(Timestamp::ZERO)
}

/// Panics unless two stores hold the same live rows, stamps included.
pub fn assert_converged(a: &Database, b: &Database) {
    let live = |db: &Database| {
        let mut rows = snapshot(db);
        keep_live::<Team>(&mut rows);
        keep_live::<Race>(&mut rows);
        keep_live::<RaceTeam>(&mut rows);
        keep_live::<Kart>(&mut rows);
        keep_live::<PitlaneConfig>(&mut rows);
        keep_live::<PitlaneCurrent>(&mut rows);
        keep_live::<PitlaneHistory>(&mut rows);
        rows
    };
    assert_eq!(live(a), live(b), "replicas diverged");
}

fn keep_live<E: Entity>(changes: &mut ChangeSet) {
    E::records_mut(changes).retain(|r| r.is_live());
}
