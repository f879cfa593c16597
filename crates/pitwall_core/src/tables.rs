//! In-memory image of the seven tables plus store metadata.

use crate::journal::JournalOp;
use pitwall_protocol::{
    ChangeSet, Entity, Kart, KartId, PitlaneConfig, PitlaneConfigId, PitlaneCurrent,
    PitlaneEntryId, PitlaneHistory, PitlaneHistoryId, Race, RaceId, RaceTeam, RaceTeamKey, Record,
    TableName, Team, TeamId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Scalars persisted next to the tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Server checkpoint fully ingested by this store.
    pub last_sync: Timestamp,
    /// Local clock reading up to which rows have been pushed.
    pub pushed_through: Timestamp,
    /// Identity of this store, seeds id allocation.
    pub device_id: Uuid,
}

/// Live and tombstoned row counts of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCount {
    /// Rows that are not deleted.
    pub live: usize,
    /// Tombstones still held.
    pub tombstones: usize,
}

/// A stored record and when this store took it in.
///
/// `received_at` orders rows for [`Tables::changes_since`] and never takes
/// part in last-write-wins. It equals `updated_at` for local writes and for
/// rows a replica merges. For rows a replica pushes, the server raises it to
/// at least the exchange time.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<E: Entity> {
    /// The record as written.
    pub record: Record<E>,
    /// Receipt stamp.
    pub received_at: Timestamp,
}

impl<E: Entity> Row<E> {
    /// A row received when it was written.
    pub fn local(record: Record<E>) -> Self {
        let received_at = record.updated_at;
        Self {
            record,
            received_at,
        }
    }
}

/// The seven tables, keyed like the server schema.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    teams: BTreeMap<TeamId, Row<Team>>,
    races: BTreeMap<RaceId, Row<Race>>,
    race_teams: BTreeMap<RaceTeamKey, Row<RaceTeam>>,
    karts: BTreeMap<KartId, Row<Kart>>,
    pitlane_configs: BTreeMap<PitlaneConfigId, Row<PitlaneConfig>>,
    pitlane_current: BTreeMap<PitlaneEntryId, Row<PitlaneCurrent>>,
    pitlane_history: BTreeMap<PitlaneHistoryId, Row<PitlaneHistory>>,
    pub(crate) meta: StoreMeta,
}

/// An entity with a table in [`Tables`].
pub trait StoredEntity: Entity {
    /// The table holding this entity.
    fn table(tables: &Tables) -> &BTreeMap<Self::Key, Row<Self>>;

    /// Mutable access to the table.
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Key, Row<Self>>;

    /// Journal operation writing `row`.
    fn put_op(row: Row<Self>) -> JournalOp;

    /// Journal operation removing `key`.
    fn purge_op(key: Self::Key) -> JournalOp;
}

macro_rules! stored {
    ($body:ty, $field:ident, $put:ident, $purge:ident) => {
        impl StoredEntity for $body {
            fn table(tables: &Tables) -> &BTreeMap<Self::Key, Row<Self>> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Key, Row<Self>> {
                &mut tables.$field
            }

            fn put_op(row: Row<Self>) -> JournalOp {
                JournalOp::$put(row.record, row.received_at)
            }

            fn purge_op(key: Self::Key) -> JournalOp {
                JournalOp::$purge(key)
            }
        }
    };
}

stored!(Team, teams, Team, PurgeTeam);
stored!(Race, races, Race, PurgeRace);
stored!(RaceTeam, race_teams, RaceTeam, PurgeRaceTeam);
stored!(Kart, karts, Kart, PurgeKart);
stored!(PitlaneConfig, pitlane_configs, PitlaneConfig, PurgePitlaneConfig);
stored!(PitlaneCurrent, pitlane_current, PitlaneCurrent, PurgePitlaneCurrent);
stored!(PitlaneHistory, pitlane_history, PitlaneHistory, PurgePitlaneHistory);

impl Tables {
    /// Looks up a row, tombstones included.
    pub fn get<E: StoredEntity>(&self, key: &E::Key) -> Option<&Record<E>> {
        E::table(self).get(key).map(|row| &row.record)
    }

    /// Receipt stamp of the row under `key`.
    pub fn received_at<E: StoredEntity>(&self, key: &E::Key) -> Option<Timestamp> {
        E::table(self).get(key).map(|row| row.received_at)
    }

    /// Looks up the body of a live row.
    pub fn live<E: StoredEntity>(&self, key: &E::Key) -> Option<&E> {
        self.get::<E>(key).and_then(Record::body)
    }

    /// All rows of `E` in key order, tombstones included.
    pub fn scan<E: StoredEntity>(&self) -> impl Iterator<Item = &Record<E>> {
        E::table(self).values().map(|row| &row.record)
    }

    /// Live rows of `E` with their keys.
    pub fn live_rows<E: StoredEntity>(&self) -> impl Iterator<Item = (E::Key, &E)> {
        self.scan::<E>()
            .filter_map(|r| r.body().map(|body| (r.key, body)))
    }

    /// Live and tombstoned row counts of `E`.
    pub fn count<E: StoredEntity>(&self) -> TableCount {
        let live = self.scan::<E>().filter(|r| r.is_live()).count();
        TableCount {
            live,
            tombstones: E::table(self).len() - live,
        }
    }

    /// Row counts per table, in dependency order.
    pub fn counts(&self) -> Vec<(TableName, TableCount)> {
        vec![
            (TableName::Teams, self.count::<Team>()),
            (TableName::Races, self.count::<Race>()),
            (TableName::RaceTeams, self.count::<RaceTeam>()),
            (TableName::Karts, self.count::<Kart>()),
            (TableName::PitlaneConfigs, self.count::<PitlaneConfig>()),
            (TableName::PitlaneCurrent, self.count::<PitlaneCurrent>()),
            (TableName::PitlaneHistory, self.count::<PitlaneHistory>()),
        ]
    }

    /// Store metadata.
    pub fn meta(&self) -> StoreMeta {
        self.meta
    }

    /// Rows received after `since`; every row when `since` is zero.
    pub fn changes_since(&self, since: Timestamp) -> ChangeSet {
        fn collect<E: StoredEntity>(tables: &Tables, since: Timestamp, out: &mut ChangeSet) {
            E::records_mut(out).extend(
                E::table(tables)
                    .values()
                    .filter(|row| since.is_zero() || row.received_at > since)
                    .map(|row| row.record.clone()),
            );
        }
        let mut changes = ChangeSet::new();
        collect::<Team>(self, since, &mut changes);
        collect::<Race>(self, since, &mut changes);
        collect::<RaceTeam>(self, since, &mut changes);
        collect::<Kart>(self, since, &mut changes);
        collect::<PitlaneConfig>(self, since, &mut changes);
        collect::<PitlaneCurrent>(self, since, &mut changes);
        collect::<PitlaneHistory>(self, since, &mut changes);
        changes
    }

    /// Largest numeric id held in any table.
    pub fn max_numeric_id(&self) -> i64 {
        [
            self.teams.keys().next_back().map(|k| k.get()),
            self.races.keys().next_back().map(|k| k.get()),
            self.karts.keys().next_back().map(|k| k.get()),
            self.pitlane_configs.keys().next_back().map(|k| k.get()),
            self.pitlane_current.keys().next_back().map(|k| k.get()),
            self.pitlane_history.keys().next_back().map(|k| k.get()),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    /// Journal operations that rebuild this image from nothing.
    pub(crate) fn snapshot_ops(&self) -> Vec<JournalOp> {
        fn puts<E: StoredEntity>(tables: &Tables, ops: &mut Vec<JournalOp>) {
            ops.extend(E::table(tables).values().cloned().map(E::put_op));
        }
        let mut ops = vec![
            JournalOp::Device(self.meta.device_id),
            JournalOp::Checkpoint(self.meta.last_sync),
            JournalOp::Pushed(self.meta.pushed_through),
        ];
        puts::<Team>(self, &mut ops);
        puts::<Race>(self, &mut ops);
        puts::<RaceTeam>(self, &mut ops);
        puts::<Kart>(self, &mut ops);
        puts::<PitlaneConfig>(self, &mut ops);
        puts::<PitlaneCurrent>(self, &mut ops);
        puts::<PitlaneHistory>(self, &mut ops);
        ops
    }
}
