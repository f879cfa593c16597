//! Last-write-wins merge of inbound change-sets.
//!
//! Records are applied table by table, parents before children. For every
//! key the row with the larger `updatedAt` wins; ties keep the local row.
//! Queue entries get extra care:
//!
//! - all `pitlane_current` tombstones are applied before any live entry, so
//!   slots freed remotely are free before entries move into them
//! - live entries are applied in slot order, so a remote shift-down moves each
//!   entry into a slot its predecessor already vacated
//! - a live entry whose slot is held by another live entry is a
//!   [`SlotWrite::Occupied`] result; the occupant is released and the write
//!   retried once

use crate::config::TombstoneMode;
use crate::database::Transaction;
use crate::error::{CoreError, CoreResult};
use crate::tables::{StoredEntity, Tables};
use pitwall_protocol::{
    ChangeSet, Entity, Kart, PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId,
    PitlaneHistory, Race, RaceTeam, Record, RecordState, TableName, Team, Timestamp,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Counts of what a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Rows that did not exist locally.
    pub inserted: usize,
    /// Live rows that overwrote an older local row.
    pub replaced: usize,
    /// Tombstones that overwrote an older local row.
    pub removed: usize,
    /// Rows that lost last-write-wins, or tombstones for rows a replica
    /// never held.
    pub stale: usize,
    /// Live rows skipped because a parent is missing or deleted.
    pub orphaned: usize,
    /// Queue entries released to make room for an incoming entry.
    pub slots_released: usize,
}

impl MergeReport {
    /// Rows that changed local state.
    pub fn applied(&self) -> usize {
        self.inserted + self.replaced + self.removed
    }

    /// Adds the counts of `other` to this report.
    pub fn absorb(&mut self, other: &MergeReport) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.removed += other.removed;
        self.stale += other.stale;
        self.orphaned += other.orphaned;
        self.slots_released += other.slots_released;
    }
}

/// Result of attempting to write a live queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWrite {
    /// The entry was written, or did not need to be.
    Done,
    /// Another live entry holds the slot; nothing was written.
    Occupied {
        /// The entry holding the slot.
        occupant: PitlaneEntryId,
    },
}

/// Merges `changes` into the store.
///
/// # Errors
///
/// Returns `SlotIntegrity` when a slot is still held after its occupant was
/// released. The caller's transaction is then rolled back as a whole.
pub fn apply_change_set(
    txn: &mut Transaction<'_>,
    changes: &ChangeSet,
) -> CoreResult<MergeReport> {
    merge(txn, changes, None)
}

/// Merges a change-set pushed by a replica into the authoritative store.
///
/// Winners are decided exactly as in [`apply_change_set`], on each row's own
/// `updatedAt`. Every accepted row keeps that stamp but is recorded as
/// received at `max(updatedAt, received_at)`. A replica's checkpoint is a
/// server clock reading, so a row pushed late with an old device stamp
/// would otherwise sort below checkpoints other replicas already hold and
/// never reach them.
pub fn apply_received(
    txn: &mut Transaction<'_>,
    changes: &ChangeSet,
    received_at: Timestamp,
) -> CoreResult<MergeReport> {
    merge(txn, changes, Some(received_at))
}

/// Removes from `outgoing` the rows identical to one in `pushed`.
///
/// The pushing replica already holds those rows.
pub fn drop_echoes(outgoing: &mut ChangeSet, pushed: &ChangeSet) -> usize {
    fn drop_table<E: Entity>(outgoing: &mut ChangeSet, pushed: &ChangeSet) -> usize {
        let sent: BTreeMap<E::Key, &Record<E>> =
            E::records(pushed).iter().map(|r| (r.key, r)).collect();
        if sent.is_empty() {
            return 0;
        }
        let rows = E::records_mut(outgoing);
        let before = rows.len();
        rows.retain(|row| sent.get(&row.key) != Some(&row));
        before - rows.len()
    }

    drop_table::<Team>(outgoing, pushed)
        + drop_table::<Race>(outgoing, pushed)
        + drop_table::<RaceTeam>(outgoing, pushed)
        + drop_table::<Kart>(outgoing, pushed)
        + drop_table::<PitlaneConfig>(outgoing, pushed)
        + drop_table::<PitlaneCurrent>(outgoing, pushed)
        + drop_table::<PitlaneHistory>(outgoing, pushed)
}

fn merge(
    txn: &mut Transaction<'_>,
    changes: &ChangeSet,
    received_at: Option<Timestamp>,
) -> CoreResult<MergeReport> {
    let mut report = MergeReport::default();

    merge_table::<Team>(txn, changes, received_at, &mut report);
    merge_table::<Race>(txn, changes, received_at, &mut report);
    merge_table::<RaceTeam>(txn, changes, received_at, &mut report);
    merge_table::<Kart>(txn, changes, received_at, &mut report);
    merge_table::<PitlaneConfig>(txn, changes, received_at, &mut report);

    for record in changes.pitlane_current.iter().filter(|r| r.is_tombstone()) {
        merge_record(txn, record, received_at, &mut report);
    }
    let mut live: Vec<_> = changes
        .pitlane_current
        .iter()
        .filter_map(|r| r.body().map(|body| (body.slot(), r.updated_at, r)))
        .collect();
    live.sort_by_key(|(slot, at, _)| (*slot, *at));
    for (slot, _, record) in live {
        merge_current(txn, slot, record, received_at, &mut report)?;
    }

    merge_table::<PitlaneHistory>(txn, changes, received_at, &mut report);

    if report.applied() > 0 || report.orphaned > 0 {
        debug!(
            inserted = report.inserted,
            replaced = report.replaced,
            removed = report.removed,
            stale = report.stale,
            orphaned = report.orphaned,
            slots_released = report.slots_released,
            "change-set merged"
        );
    }
    Ok(report)
}

fn merge_current(
    txn: &mut Transaction<'_>,
    (config, line, position): (PitlaneConfigId, u32, u32),
    record: &Record<PitlaneCurrent>,
    received_at: Option<Timestamp>,
    report: &mut MergeReport,
) -> CoreResult<()> {
    let SlotWrite::Occupied { occupant } = try_write_current(txn, record, received_at, report)
    else {
        return Ok(());
    };
    release_slot(txn, occupant, report);
    match try_write_current(txn, record, received_at, report) {
        SlotWrite::Done => Ok(()),
        SlotWrite::Occupied { .. } => Err(CoreError::SlotIntegrity {
            config,
            line,
            position,
        }),
    }
}

/// Attempts to write a live queue entry under last-write-wins.
///
/// Returns [`SlotWrite::Occupied`] instead of writing when a different live
/// entry holds the same `(config, line, position)`. With `received_at`, an
/// accepted entry is recorded as received no earlier than that time.
pub fn try_write_current(
    txn: &mut Transaction<'_>,
    record: &Record<PitlaneCurrent>,
    received_at: Option<Timestamp>,
    report: &mut MergeReport,
) -> SlotWrite {
    let Some(body) = record.body() else {
        merge_record(txn, record, received_at, report);
        return SlotWrite::Done;
    };
    if loses_to_local(txn, record) {
        report.stale += 1;
        return SlotWrite::Done;
    }
    let occupant = txn
        .live_rows::<PitlaneCurrent>()
        .find(|(key, entry)| *key != record.key && entry.slot() == body.slot())
        .map(|(key, _)| key);
    match occupant {
        Some(occupant) => SlotWrite::Occupied { occupant },
        None => {
            merge_record(txn, record, received_at, report);
            SlotWrite::Done
        }
    }
}

/// Releases a queue slot by deleting its occupant without writing history.
///
/// Replicas drop the row; a retaining store tombstones it at a fresh
/// timestamp so the release reaches every other replica.
pub fn release_slot(txn: &mut Transaction<'_>, occupant: PitlaneEntryId, report: &mut MergeReport) {
    let slot = txn.live::<PitlaneCurrent>(&occupant).map(PitlaneCurrent::slot);
    warn!(
        entry = %occupant,
        ?slot,
        "releasing occupied pit-lane slot for incoming entry"
    );
    match txn.tombstone_mode() {
        TombstoneMode::Purge => {
            txn.purge::<PitlaneCurrent>(occupant);
        }
        TombstoneMode::Retain => {
            txn.tombstone::<PitlaneCurrent>(occupant);
        }
    }
    report.slots_released += 1;
}

/// Drops local tombstones the server has now observed.
///
/// A tombstone in `pushed` is purged when the local row is still that same
/// tombstone. Retaining stores keep everything and return 0.
pub fn purge_acknowledged(txn: &mut Transaction<'_>, pushed: &ChangeSet) -> usize {
    fn purge_table<E: StoredEntity>(txn: &mut Transaction<'_>, pushed: &ChangeSet) -> usize {
        let mut purged = 0;
        for sent in E::records(pushed).iter().filter(|r| r.is_tombstone()) {
            let unchanged = txn
                .get::<E>(&sent.key)
                .is_some_and(|local| local.is_tombstone() && local.updated_at == sent.updated_at);
            if unchanged && txn.purge::<E>(sent.key).is_some() {
                purged += 1;
            }
        }
        purged
    }

    if txn.tombstone_mode() == TombstoneMode::Retain {
        return 0;
    }
    purge_table::<Team>(txn, pushed)
        + purge_table::<Race>(txn, pushed)
        + purge_table::<RaceTeam>(txn, pushed)
        + purge_table::<Kart>(txn, pushed)
        + purge_table::<PitlaneConfig>(txn, pushed)
        + purge_table::<PitlaneCurrent>(txn, pushed)
        + purge_table::<PitlaneHistory>(txn, pushed)
}

/// Foreign keys checked before a live row is merged.
trait Parents: StoredEntity {
    fn missing_parent(tables: &Tables, key: &Self::Key, body: &Self) -> Option<TableName>;
}

impl Parents for Team {
    fn missing_parent(_: &Tables, _: &Self::Key, _: &Self) -> Option<TableName> {
        None
    }
}

impl Parents for Race {
    fn missing_parent(_: &Tables, _: &Self::Key, _: &Self) -> Option<TableName> {
        None
    }
}

impl Parents for RaceTeam {
    fn missing_parent(tables: &Tables, key: &Self::Key, _: &Self) -> Option<TableName> {
        if tables.live::<Race>(&key.race_id).is_none() {
            Some(TableName::Races)
        } else if tables.live::<Team>(&key.team_id).is_none() {
            Some(TableName::Teams)
        } else {
            None
        }
    }
}

impl Parents for Kart {
    fn missing_parent(tables: &Tables, _: &Self::Key, body: &Self) -> Option<TableName> {
        tables
            .live::<Race>(&body.race_id)
            .is_none()
            .then_some(TableName::Races)
    }
}

impl Parents for PitlaneConfig {
    fn missing_parent(tables: &Tables, _: &Self::Key, body: &Self) -> Option<TableName> {
        tables
            .live::<Race>(&body.race_id)
            .is_none()
            .then_some(TableName::Races)
    }
}

impl Parents for PitlaneCurrent {
    fn missing_parent(tables: &Tables, _: &Self::Key, body: &Self) -> Option<TableName> {
        tables
            .live::<PitlaneConfig>(&body.pitlane_config_id)
            .is_none()
            .then_some(TableName::PitlaneConfigs)
    }
}

impl Parents for PitlaneHistory {
    fn missing_parent(tables: &Tables, _: &Self::Key, body: &Self) -> Option<TableName> {
        tables
            .live::<PitlaneConfig>(&body.pitlane_config_id)
            .is_none()
            .then_some(TableName::PitlaneConfigs)
    }
}

fn merge_table<E: Parents>(
    txn: &mut Transaction<'_>,
    changes: &ChangeSet,
    received_at: Option<Timestamp>,
    report: &mut MergeReport,
) {
    for record in E::records(changes) {
        merge_record(txn, record, received_at, report);
    }
}

fn store<E: StoredEntity>(
    txn: &mut Transaction<'_>,
    incoming: &Record<E>,
    received_at: Option<Timestamp>,
) {
    let receipt = received_at.map_or(incoming.updated_at, |at| incoming.updated_at.max(at));
    txn.put_received(incoming.clone(), receipt);
}

fn loses_to_local<E: StoredEntity>(txn: &Transaction<'_>, incoming: &Record<E>) -> bool {
    txn.get::<E>(&incoming.key)
        .is_some_and(|local| incoming.updated_at <= local.updated_at)
}

fn merge_record<E: Parents>(
    txn: &mut Transaction<'_>,
    incoming: &Record<E>,
    received_at: Option<Timestamp>,
    report: &mut MergeReport,
) {
    if loses_to_local(txn, incoming) {
        debug!(table = %E::TABLE, key = %incoming.key, at = %incoming.updated_at, "stale");
        report.stale += 1;
        return;
    }
    let exists = txn.get::<E>(&incoming.key).is_some();

    match &incoming.state {
        RecordState::Active(body) => {
            if let Some(parent) = E::missing_parent(txn, &incoming.key, body) {
                warn!(
                    table = %E::TABLE,
                    key = %incoming.key,
                    %parent,
                    "skipping record whose parent is missing or deleted"
                );
                report.orphaned += 1;
                return;
            }
            store(txn, incoming, received_at);
            if exists {
                debug!(table = %E::TABLE, key = %incoming.key, "replaced");
                report.replaced += 1;
            } else {
                debug!(table = %E::TABLE, key = %incoming.key, "inserted");
                report.inserted += 1;
            }
        }
        RecordState::Tombstoned { .. } => match (txn.tombstone_mode(), exists) {
            (TombstoneMode::Retain, true) => {
                store(txn, incoming, received_at);
                debug!(table = %E::TABLE, key = %incoming.key, "tombstoned");
                report.removed += 1;
            }
            (TombstoneMode::Retain, false) => {
                store(txn, incoming, received_at);
                report.inserted += 1;
            }
            (TombstoneMode::Purge, true) => {
                txn.purge::<E>(incoming.key);
                debug!(table = %E::TABLE, key = %incoming.key, "purged");
                report.removed += 1;
            }
            (TombstoneMode::Purge, false) => {
                report.stale += 1;
            }
        },
    }
}
