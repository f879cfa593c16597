//! Consistency checks over a table image.
//!
//! The queue engine maintains these invariants for local writes; merges can
//! briefly break contiguity until the next write to the line. `pitwall
//! verify` and the property tests run [`audit`] to find what is off.

use crate::tables::Tables;
use pitwall_protocol::{
    Kart, KartId, PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId, PitlaneHistory,
    PitlaneHistoryId, Race, RaceId, RaceTeam, TableName, Team,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Live positions of a line are not `0..n`.
    NonContiguousLine {
        /// Configuration.
        config: PitlaneConfigId,
        /// Line.
        line: u32,
        /// Positions found, ascending.
        positions: Vec<u32>,
    },
    /// A line holds more karts than the queue size.
    LineOverCapacity {
        /// Configuration.
        config: PitlaneConfigId,
        /// Line.
        line: u32,
        /// Karts in the line.
        len: usize,
        /// Configured queue size.
        capacity: u32,
    },
    /// An entry sits on a line the configuration does not have.
    LineOutOfRange {
        /// The entry.
        entry: PitlaneEntryId,
        /// Its line.
        line: u32,
        /// Lines in the configuration.
        lines_count: u32,
    },
    /// A kart holds more than one slot in a configuration.
    KartQueuedTwice {
        /// Configuration.
        config: PitlaneConfigId,
        /// The kart.
        kart: KartId,
        /// Entries holding it.
        entries: Vec<PitlaneEntryId>,
    },
    /// A history row exits before it entered.
    ExitBeforeEntry {
        /// The history row.
        history: PitlaneHistoryId,
    },
    /// A live row points at a missing or deleted parent.
    DanglingParent {
        /// Table of the child row.
        table: TableName,
        /// Key of the child row.
        key: String,
        /// Table of the missing parent.
        parent: TableName,
    },
    /// Two live memberships of a race share a number.
    DuplicateNumber {
        /// The race.
        race: RaceId,
        /// The shared number.
        number: String,
    },
    /// A race has more than one live configuration.
    DuplicateConfig {
        /// The race.
        race: RaceId,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NonContiguousLine {
                config,
                line,
                positions,
            } => write!(f, "config {config} line {line}: positions {positions:?} are not contiguous"),
            Violation::LineOverCapacity {
                config,
                line,
                len,
                capacity,
            } => write!(f, "config {config} line {line}: {len} karts exceed queue size {capacity}"),
            Violation::LineOutOfRange {
                entry,
                line,
                lines_count,
            } => write!(f, "entry {entry}: line {line} outside 1..={lines_count}"),
            Violation::KartQueuedTwice {
                config,
                kart,
                entries,
            } => write!(f, "config {config}: kart {kart} queued {} times", entries.len()),
            Violation::ExitBeforeEntry { history } => {
                write!(f, "history {history}: exited before it entered")
            }
            Violation::DanglingParent { table, key, parent } => {
                write!(f, "{table} {key}: parent in {parent} is missing or deleted")
            }
            Violation::DuplicateNumber { race, number } => {
                write!(f, "race {race}: number {number} used more than once")
            }
            Violation::DuplicateConfig { race } => {
                write!(f, "race {race}: more than one pit-lane config")
            }
        }
    }
}

/// Checks every invariant and returns what is broken.
pub fn audit(tables: &Tables) -> Vec<Violation> {
    let mut found = Vec::new();
    check_queue(tables, &mut found);
    check_history(tables, &mut found);
    check_parents(tables, &mut found);
    check_uniqueness(tables, &mut found);
    found
}

fn check_queue(tables: &Tables, found: &mut Vec<Violation>) {
    let mut lines: BTreeMap<(PitlaneConfigId, u32), Vec<u32>> = BTreeMap::new();
    let mut karts: BTreeMap<(PitlaneConfigId, KartId), Vec<PitlaneEntryId>> = BTreeMap::new();

    for (id, entry) in tables.live_rows::<PitlaneCurrent>() {
        lines
            .entry((entry.pitlane_config_id, entry.line_number))
            .or_default()
            .push(entry.queue_position);
        karts
            .entry((entry.pitlane_config_id, entry.kart_id))
            .or_default()
            .push(id);
        if let Some(config) = tables.live::<PitlaneConfig>(&entry.pitlane_config_id) {
            if entry.line_number < 1 || entry.line_number > config.lines_count {
                found.push(Violation::LineOutOfRange {
                    entry: id,
                    line: entry.line_number,
                    lines_count: config.lines_count,
                });
            }
        }
    }

    for ((config, line), mut positions) in lines {
        positions.sort_unstable();
        let contiguous = (0u32..).zip(&positions).all(|(want, got)| want == *got);
        if !contiguous {
            found.push(Violation::NonContiguousLine {
                config,
                line,
                positions: positions.clone(),
            });
        }
        if let Some(shape) = tables.live::<PitlaneConfig>(&config) {
            if positions.len() > shape.queue_size as usize {
                found.push(Violation::LineOverCapacity {
                    config,
                    line,
                    len: positions.len(),
                    capacity: shape.queue_size,
                });
            }
        }
    }

    for ((config, kart), entries) in karts {
        if entries.len() > 1 {
            found.push(Violation::KartQueuedTwice {
                config,
                kart,
                entries,
            });
        }
    }
}

fn check_history(tables: &Tables, found: &mut Vec<Violation>) {
    for (id, history) in tables.live_rows::<PitlaneHistory>() {
        if history.exited_at < history.entered_at {
            found.push(Violation::ExitBeforeEntry { history: id });
        }
    }
}

fn check_parents(tables: &Tables, found: &mut Vec<Violation>) {
    let race_live = |id: &RaceId| tables.live::<Race>(id).is_some();
    let config_live = |id: &PitlaneConfigId| tables.live::<PitlaneConfig>(id).is_some();
    let mut dangling = |table: TableName, key: String, parent: TableName| {
        found.push(Violation::DanglingParent { table, key, parent });
    };

    for (key, _) in tables.live_rows::<RaceTeam>() {
        if !race_live(&key.race_id) {
            dangling(TableName::RaceTeams, key.to_string(), TableName::Races);
        } else if tables.live::<Team>(&key.team_id).is_none() {
            dangling(TableName::RaceTeams, key.to_string(), TableName::Teams);
        }
    }
    for (key, kart) in tables.live_rows::<Kart>() {
        if !race_live(&kart.race_id) {
            dangling(TableName::Karts, key.to_string(), TableName::Races);
        }
    }
    for (key, config) in tables.live_rows::<PitlaneConfig>() {
        if !race_live(&config.race_id) {
            dangling(TableName::PitlaneConfigs, key.to_string(), TableName::Races);
        }
    }
    for (key, entry) in tables.live_rows::<PitlaneCurrent>() {
        if !config_live(&entry.pitlane_config_id) {
            dangling(TableName::PitlaneCurrent, key.to_string(), TableName::PitlaneConfigs);
        }
    }
    for (key, history) in tables.live_rows::<PitlaneHistory>() {
        if !config_live(&history.pitlane_config_id) {
            dangling(TableName::PitlaneHistory, key.to_string(), TableName::PitlaneConfigs);
        }
    }
}

fn check_uniqueness(tables: &Tables, found: &mut Vec<Violation>) {
    let mut numbers: BTreeSet<(RaceId, &str)> = BTreeSet::new();
    let mut reported: BTreeSet<(RaceId, &str)> = BTreeSet::new();
    for (key, membership) in tables.live_rows::<RaceTeam>() {
        if let Some(number) = membership.number.as_deref() {
            let slot = (key.race_id, number);
            if !numbers.insert(slot) && reported.insert(slot) {
                found.push(Violation::DuplicateNumber {
                    race: key.race_id,
                    number: number.to_owned(),
                });
            }
        }
    }

    let mut configs: BTreeMap<RaceId, usize> = BTreeMap::new();
    for (_, config) in tables.live_rows::<PitlaneConfig>() {
        *configs.entry(config.race_id).or_default() += 1;
    }
    found.extend(
        configs
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(race, _)| Violation::DuplicateConfig { race }),
    );
}
