//! The seven-table delta exchanged during sync.

use crate::entity::{
    Entity, Kart, PitlaneConfig, PitlaneCurrent, PitlaneHistory, Race, RaceTeam, TableName, Team,
};
use crate::record::Record;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Records changed since a checkpoint, grouped by table.
///
/// Absent arrays deserialize as empty so a client may omit tables it has
/// nothing to say about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changed teams.
    #[serde(default)]
    pub teams: Vec<Record<Team>>,
    /// Changed races.
    #[serde(default)]
    pub races: Vec<Record<Race>>,
    /// Changed race memberships.
    #[serde(default)]
    pub race_teams: Vec<Record<RaceTeam>>,
    /// Changed karts.
    #[serde(default)]
    pub karts: Vec<Record<Kart>>,
    /// Changed pit-lane configurations.
    #[serde(default)]
    pub pitlane_configs: Vec<Record<PitlaneConfig>>,
    /// Changed queue entries.
    #[serde(default)]
    pub pitlane_current: Vec<Record<PitlaneCurrent>>,
    /// Changed history rows.
    #[serde(default)]
    pub pitlane_history: Vec<Record<PitlaneHistory>>,
}

impl ChangeSet {
    /// Creates an empty change-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to its table.
    pub fn push<E: Entity>(&mut self, record: Record<E>) {
        E::records_mut(self).push(record);
    }

    /// Records of type `E`.
    pub fn of<E: Entity>(&self) -> &[Record<E>] {
        E::records(self)
    }

    /// Number of records in `table`.
    pub fn count(&self, table: TableName) -> usize {
        match table {
            TableName::Teams => self.teams.len(),
            TableName::Races => self.races.len(),
            TableName::RaceTeams => self.race_teams.len(),
            TableName::Karts => self.karts.len(),
            TableName::PitlaneConfigs => self.pitlane_configs.len(),
            TableName::PitlaneCurrent => self.pitlane_current.len(),
            TableName::PitlaneHistory => self.pitlane_history.len(),
        }
    }

    /// Total number of records across all tables.
    pub fn len(&self) -> usize {
        TableName::ALL.iter().map(|t| self.count(*t)).sum()
    }

    /// Returns true if no table has records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest `updatedAt` in the set.
    pub fn max_updated_at(&self) -> Option<Timestamp> {
        fn newest<E: Entity>(records: &[Record<E>]) -> Option<Timestamp> {
            records.iter().map(|r| r.updated_at).max()
        }
        [
            newest(&self.teams),
            newest(&self.races),
            newest(&self.race_teams),
            newest(&self.karts),
            newest(&self.pitlane_configs),
            newest(&self.pitlane_current),
            newest(&self.pitlane_history),
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

impl<E: Entity> Extend<Record<E>> for ChangeSet {
    fn extend<I: IntoIterator<Item = Record<E>>>(&mut self, iter: I) {
        E::records_mut(self).extend(iter);
    }
}

impl<E: Entity> FromIterator<Record<E>> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Record<E>>>(iter: I) -> Self {
        let mut changes = Self::new();
        changes.extend(iter);
        changes
    }
}
