//! Entity bodies, typed keys and the table catalogue.

use crate::change_set::ChangeSet;
use crate::record::Record;
use crate::timestamp::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// A primary key that knows how it is spelled on the wire.
///
/// Numeric keys travel as `{"id": n}`; the composite race/team key travels as
/// `{"raceId": r, "teamId": t}`. The wire form is flattened into the record
/// object.
pub trait RecordKey: Copy + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Flattened wire representation of the key.
    type Wire: Serialize + DeserializeOwned;

    /// Converts the key to its wire form.
    fn to_wire(self) -> Self::Wire;

    /// Rebuilds the key from its wire form.
    fn from_wire(wire: Self::Wire) -> Self;
}

/// Wire form of a numeric surrogate key.
#[doc(hidden)]
#[derive(Serialize, Deserialize)]
pub struct IdField<K> {
    pub id: K,
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw numeric id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl RecordKey for $name {
            type Wire = IdField<Self>;

            fn to_wire(self) -> Self::Wire {
                IdField { id: self }
            }

            fn from_wire(wire: Self::Wire) -> Self {
                wire.id
            }
        }
    };
}

id_type!(
    /// Identifier of a team.
    TeamId
);
id_type!(
    /// Identifier of a race.
    RaceId
);
id_type!(
    /// Identifier of a kart.
    KartId
);
id_type!(
    /// Identifier of a pit-lane configuration.
    PitlaneConfigId
);
id_type!(
    /// Identifier of a live pit-lane queue entry.
    PitlaneEntryId
);
id_type!(
    /// Identifier of a pit-lane history row.
    PitlaneHistoryId
);

/// Composite key of a race membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceTeamKey {
    /// The race.
    pub race_id: RaceId,
    /// The team.
    pub team_id: TeamId,
}

impl RaceTeamKey {
    /// Creates a membership key.
    #[must_use]
    pub const fn new(race_id: RaceId, team_id: TeamId) -> Self {
        Self { race_id, team_id }
    }
}

impl fmt::Display for RaceTeamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "race {}/team {}", self.race_id, self.team_id)
    }
}

impl RecordKey for RaceTeamKey {
    type Wire = Self;

    fn to_wire(self) -> Self::Wire {
        self
    }

    fn from_wire(wire: Self::Wire) -> Self {
        wire
    }
}

/// The seven synchronized tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableName {
    /// `teams`
    Teams,
    /// `races`
    Races,
    /// `race_teams`
    RaceTeams,
    /// `karts`
    Karts,
    /// `pitlane_configs`
    PitlaneConfigs,
    /// `pitlane_current`
    PitlaneCurrent,
    /// `pitlane_history`
    PitlaneHistory,
}

impl TableName {
    /// All tables, parents before children.
    pub const ALL: [TableName; 7] = [
        TableName::Teams,
        TableName::Races,
        TableName::RaceTeams,
        TableName::Karts,
        TableName::PitlaneConfigs,
        TableName::PitlaneCurrent,
        TableName::PitlaneHistory,
    ];

    /// The change-set key of this table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TableName::Teams => "teams",
            TableName::Races => "races",
            TableName::RaceTeams => "race_teams",
            TableName::Karts => "karts",
            TableName::PitlaneConfigs => "pitlane_configs",
            TableName::PitlaneCurrent => "pitlane_current",
            TableName::PitlaneHistory => "pitlane_history",
        }
    }
}

impl Serialize for TableName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The business fields of one of the seven record types.
///
/// Implementors are the *bodies* of records: keys and sync fields live on
/// [`Record`].
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Primary key type.
    type Key: RecordKey;

    /// The table this entity lives in.
    const TABLE: TableName;

    /// The slice of `changes` holding records of this type.
    fn records(changes: &ChangeSet) -> &[Record<Self>];

    /// Mutable access to the records of this type in `changes`.
    fn records_mut(changes: &mut ChangeSet) -> &mut Vec<Record<Self>>;
}

macro_rules! entity {
    ($body:ty, $key:ty, $table:ident, $field:ident) => {
        impl Entity for $body {
            type Key = $key;
            const TABLE: TableName = TableName::$table;

            fn records(changes: &ChangeSet) -> &[Record<Self>] {
                &changes.$field
            }

            fn records_mut(changes: &mut ChangeSet) -> &mut Vec<Record<Self>> {
                &mut changes.$field
            }
        }
    };
}

/// A racing team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Display name.
    pub name: String,
}

/// A race day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    /// Display name.
    pub name: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
}

/// A team's entry in a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceTeam {
    /// Car number, unique within the race among live memberships.
    pub number: Option<String>,
}

/// A kart available in a race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kart {
    /// Race the kart belongs to.
    pub race_id: RaceId,
    /// Condition ordinal, 1 to 5.
    pub status: u8,
    /// Team currently driving the kart, `None` while unassigned or queued.
    pub team_id: Option<TeamId>,
}

/// Shape of the pit lane for one race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitlaneConfig {
    /// Race this configuration belongs to (one per race).
    pub race_id: RaceId,
    /// Number of lines, numbered from 1.
    pub lines_count: u32,
    /// Capacity of each line.
    pub queue_size: u32,
}

/// A kart waiting in a pit-lane line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitlaneCurrent {
    /// Owning configuration.
    pub pitlane_config_id: PitlaneConfigId,
    /// Team that brought the kart in.
    pub team_id: TeamId,
    /// The queued kart.
    pub kart_id: KartId,
    /// Line, `1..=linesCount`.
    pub line_number: u32,
    /// Slot within the line, 0 is the head.
    pub queue_position: u32,
    /// When the kart entered the line.
    pub entered_at: Timestamp,
}

impl PitlaneCurrent {
    /// The `(config, line, position)` slot this entry occupies.
    #[must_use]
    pub fn slot(&self) -> (PitlaneConfigId, u32, u32) {
        (self.pitlane_config_id, self.line_number, self.queue_position)
    }
}

/// A completed stay in the pit lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PitlaneHistory {
    /// Owning configuration.
    pub pitlane_config_id: PitlaneConfigId,
    /// Team that brought the kart in.
    pub team_id: TeamId,
    /// The kart.
    pub kart_id: KartId,
    /// Line the kart waited in.
    pub line_number: u32,
    /// Slot the kart held when it left.
    pub queue_position: u32,
    /// When the kart entered the line.
    pub entered_at: Timestamp,
    /// When the kart left the line.
    pub exited_at: Timestamp,
}

impl PitlaneHistory {
    /// Builds the history row for `entry` leaving at `exited_at`.
    ///
    /// `exitedAt` never precedes `enteredAt`, even when the entry was stamped
    /// by a device whose clock runs ahead.
    #[must_use]
    pub fn from_exit(entry: &PitlaneCurrent, exited_at: Timestamp) -> Self {
        Self {
            pitlane_config_id: entry.pitlane_config_id,
            team_id: entry.team_id,
            kart_id: entry.kart_id,
            line_number: entry.line_number,
            queue_position: entry.queue_position,
            entered_at: entry.entered_at,
            exited_at: exited_at.max(entry.entered_at),
        }
    }

    /// Returns true if this row records the exit of `entry`.
    #[must_use]
    pub fn records_exit_of(&self, entry: &PitlaneCurrent) -> bool {
        self.pitlane_config_id == entry.pitlane_config_id
            && self.team_id == entry.team_id
            && self.kart_id == entry.kart_id
            && self.line_number == entry.line_number
            && self.queue_position == entry.queue_position
            && self.entered_at == entry.entered_at
    }
}

entity!(Team, TeamId, Teams, teams);
entity!(Race, RaceId, Races, races);
entity!(RaceTeam, RaceTeamKey, RaceTeams, race_teams);
entity!(Kart, KartId, Karts, karts);
entity!(PitlaneConfig, PitlaneConfigId, PitlaneConfigs, pitlane_configs);
entity!(PitlaneCurrent, PitlaneEntryId, PitlaneCurrent, pitlane_current);
entity!(PitlaneHistory, PitlaneHistoryId, PitlaneHistory, pitlane_history);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_is_parents_first() {
        let names: Vec<_> = TableName::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "teams",
                "races",
                "race_teams",
                "karts",
                "pitlane_configs",
                "pitlane_current",
                "pitlane_history"
            ]
        );
    }

    #[test]
    fn history_exit_never_precedes_entry() {
        let entry = PitlaneCurrent {
            pitlane_config_id: PitlaneConfigId(1),
            team_id: TeamId(5),
            kart_id: KartId(10),
            line_number: 1,
            queue_position: 0,
            entered_at: Timestamp::from_millis(500),
        };
        let history = PitlaneHistory::from_exit(&entry, Timestamp::from_millis(400));
        assert_eq!(history.exited_at, Timestamp::from_millis(500));
        assert!(history.records_exit_of(&entry));
    }

    #[test]
    fn composite_key_uses_camel_case() {
        let key = RaceTeamKey::new(RaceId(3), TeamId(4));
        let json = serde_json::to_value(key.to_wire()).unwrap();
        assert_eq!(json, serde_json::json!({ "raceId": 3, "teamId": 4 }));
    }
}
