//! Pit-lane queue engine.
//!
//! Each `(config, line)` pair is a bounded FIFO. Position 0 is the head.
//! Every write keeps the live positions of a line contiguous, and every kart
//! leaving a line gets a history row.

use crate::config::{EvictionPolicy, HeadEviction, QueueConfig};
use crate::database::{Database, Transaction};
use crate::error::{CoreError, CoreResult};
use crate::tables::Tables;
use pitwall_protocol::{
    Kart, KartId, PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId, PitlaneHistory,
    PitlaneHistoryId, Race, RaceId, Record, TableName, Team, TeamId,
};
use std::sync::Arc;
use tracing::info;

/// What `add_kart` did.
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    /// The new queue entry.
    pub entry: Record<PitlaneCurrent>,
    /// History rows of karts evicted from the head, oldest first.
    pub evicted: Vec<Record<PitlaneHistory>>,
}

/// Applies queue operations to a store.
///
/// Every operation runs in one store transaction: a failed precondition
/// leaves the store untouched and partial shifts are never visible.
#[derive(Debug, Clone)]
pub struct QueueEngine {
    db: Arc<Database>,
    config: QueueConfig,
}

impl QueueEngine {
    /// Creates an engine over `db`.
    pub fn new(db: Arc<Database>, config: QueueConfig) -> Self {
        Self { db, config }
    }

    /// The underlying store.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The queue behaviour in use.
    pub fn queue_config(&self) -> QueueConfig {
        self.config
    }

    /// Puts `kart_id` at the back of line `line_number`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the config, kart or team does not exist
    /// - `Validation` if the line is out of range or the kart belongs to
    ///   another race
    /// - `Conflict` if the kart is already queued in this config
    pub fn add_kart(
        &self,
        config_id: PitlaneConfigId,
        team_id: TeamId,
        kart_id: KartId,
        line_number: u32,
    ) -> CoreResult<AddOutcome> {
        let outcome = self.db.transaction(|txn| {
            add_kart(txn, self.config, config_id, team_id, kart_id, line_number)
        })?;
        info!(
            config = %config_id,
            line = line_number,
            kart = %kart_id,
            team = %team_id,
            position = ?outcome.entry.body().map(|e| e.queue_position),
            evicted = outcome.evicted.len(),
            "kart queued"
        );
        Ok(outcome)
    }

    /// Queues the kart currently driven by `team_id`.
    ///
    /// # Errors
    ///
    /// Fails when the team has no assigned kart, more than one, or its kart
    /// is already queued; otherwise as [`QueueEngine::add_kart`].
    pub fn add_team_kart(
        &self,
        config_id: PitlaneConfigId,
        team_id: TeamId,
        line_number: u32,
    ) -> CoreResult<AddOutcome> {
        let outcome = self.db.transaction(|txn| {
            let config = live_config(txn, config_id)?;
            check_line(&config, line_number)?;

            let tables: &Tables = txn;
            let team_karts: Vec<KartId> = tables
                .live_rows::<Kart>()
                .filter(|(_, k)| k.race_id == config.race_id && k.team_id == Some(team_id))
                .map(|(id, _)| id)
                .collect();
            if team_karts.is_empty() {
                return Err(CoreError::validation("team has no assigned kart"));
            }
            let available: Vec<KartId> = team_karts
                .into_iter()
                .filter(|kart| kart_entry(tables, config_id, *kart).is_none())
                .collect();
            match available.as_slice() {
                [] => Err(CoreError::conflict("team current kart is already in pitlane")),
                [kart_id] => add_kart(txn, self.config, config_id, team_id, *kart_id, line_number),
                _ => Err(CoreError::conflict("team has multiple assigned karts")),
            }
        })?;
        info!(config = %config_id, line = line_number, team = %team_id, "team kart queued");
        Ok(outcome)
    }

    /// Takes an entry out of its line, closing the gap behind it.
    ///
    /// With `assign_to`, the departing kart goes to that team and any other
    /// kart the team held in the race is unassigned.
    pub fn remove_kart(
        &self,
        entry_id: PitlaneEntryId,
        assign_to: Option<TeamId>,
    ) -> CoreResult<Record<PitlaneHistory>> {
        let history = self.db.transaction(|txn| remove_kart(txn, entry_id, assign_to))?;
        info!(entry = %entry_id, assign_to = ?assign_to.map(TeamId::get), "kart left pit lane");
        Ok(history)
    }

    /// Empties a line, writing one history row per entry.
    pub fn clear_line(&self, config_id: PitlaneConfigId, line_number: u32) -> CoreResult<usize> {
        let cleared = self.db.transaction(|txn| {
            let config = live_config(txn, config_id)?;
            check_line(&config, line_number)?;
            let entries = line_entries(txn, config_id, line_number);
            for (id, entry) in &entries {
                exit_entry(txn, *id, entry);
            }
            Ok(entries.len())
        })?;
        info!(config = %config_id, line = line_number, cleared, "line cleared");
        Ok(cleared)
    }

    /// Creates the pit-lane configuration of a race.
    pub fn create_config(
        &self,
        race_id: RaceId,
        lines_count: u32,
        queue_size: u32,
    ) -> CoreResult<Record<PitlaneConfig>> {
        self.db.transaction(|txn| {
            if txn.live::<Race>(&race_id).is_none() {
                return Err(CoreError::not_found(TableName::Races, "race not found"));
            }
            if config_for_race(txn, race_id).is_some() {
                return Err(CoreError::conflict(
                    "pitlane config already exists for this race",
                ));
            }
            check_shape(Some(lines_count), Some(queue_size))?;
            Ok(txn.create(PitlaneConfig {
                race_id,
                lines_count,
                queue_size,
            }))
        })
    }

    /// Changes the shape of a configuration.
    pub fn update_config(
        &self,
        config_id: PitlaneConfigId,
        lines_count: Option<u32>,
        queue_size: Option<u32>,
    ) -> CoreResult<Record<PitlaneConfig>> {
        self.db.transaction(|txn| {
            check_shape(lines_count, queue_size)?;
            let mut config = live_config(txn, config_id)?;
            if let Some(lines) = lines_count {
                config.lines_count = lines;
            }
            if let Some(size) = queue_size {
                config.queue_size = size;
            }
            Ok(txn.write(config_id, config))
        })
    }

    /// Soft-deletes a configuration with its queue entries and history.
    ///
    /// Entries removed this way are not exits and write no history.
    pub fn delete_config(&self, config_id: PitlaneConfigId) -> CoreResult<()> {
        let (entries, history) = self.db.transaction(|txn| {
            live_config(txn, config_id)?;
            txn.tombstone::<PitlaneConfig>(config_id);
            let entries: Vec<PitlaneEntryId> = txn
                .live_rows::<PitlaneCurrent>()
                .filter(|(_, e)| e.pitlane_config_id == config_id)
                .map(|(key, _)| key)
                .collect();
            let history: Vec<PitlaneHistoryId> = txn
                .live_rows::<PitlaneHistory>()
                .filter(|(_, h)| h.pitlane_config_id == config_id)
                .map(|(key, _)| key)
                .collect();
            for key in &entries {
                txn.tombstone::<PitlaneCurrent>(*key);
            }
            for key in &history {
                txn.tombstone::<PitlaneHistory>(*key);
            }
            Ok((entries.len(), history.len()))
        })?;
        info!(config = %config_id, entries, history, "pitlane config deleted");
        Ok(())
    }

    /// The live configuration of a race.
    pub fn config_for_race(&self, race_id: RaceId) -> Option<Record<PitlaneConfig>> {
        self.db.read(|t| {
            config_for_race(t, race_id).and_then(|id| t.get::<PitlaneConfig>(&id).cloned())
        })
    }

    /// A live configuration by id.
    pub fn config(&self, config_id: PitlaneConfigId) -> CoreResult<Record<PitlaneConfig>> {
        self.db.read(|t| {
            t.get::<PitlaneConfig>(&config_id)
                .filter(|r| r.is_live())
                .cloned()
                .ok_or_else(config_not_found)
        })
    }

    /// Live entries of a configuration, by line then position.
    pub fn current_by_config(&self, config_id: PitlaneConfigId) -> Vec<Record<PitlaneCurrent>> {
        self.db.read(|t| {
            let mut rows = live_records(t, |e: &PitlaneCurrent| e.pitlane_config_id == config_id);
            rows.sort_by_key(|r| r.body().map(|e| (e.line_number, e.queue_position)));
            rows
        })
    }

    /// Live entries of one line, by position.
    pub fn current_by_line(
        &self,
        config_id: PitlaneConfigId,
        line_number: u32,
    ) -> Vec<Record<PitlaneCurrent>> {
        self.db.read(|t| {
            let mut rows = live_records(t, |e: &PitlaneCurrent| {
                e.pitlane_config_id == config_id && e.line_number == line_number
            });
            rows.sort_by_key(|r| r.body().map(|e| e.queue_position));
            rows
        })
    }

    /// History of a configuration, most recent exit first.
    pub fn history_by_config(&self, config_id: PitlaneConfigId) -> Vec<Record<PitlaneHistory>> {
        self.db.read(|t| {
            newest_first(live_records(t, |h: &PitlaneHistory| {
                h.pitlane_config_id == config_id
            }))
        })
    }

    /// History of one line, most recent exit first.
    pub fn history_by_line(
        &self,
        config_id: PitlaneConfigId,
        line_number: u32,
    ) -> Vec<Record<PitlaneHistory>> {
        self.db.read(|t| {
            newest_first(live_records(t, |h: &PitlaneHistory| {
                h.pitlane_config_id == config_id && h.line_number == line_number
            }))
        })
    }
}

fn config_not_found() -> CoreError {
    CoreError::not_found(TableName::PitlaneConfigs, "pitlane config not found")
}

fn live_config(tables: &Tables, config_id: PitlaneConfigId) -> CoreResult<PitlaneConfig> {
    tables
        .live::<PitlaneConfig>(&config_id)
        .cloned()
        .ok_or_else(config_not_found)
}

fn check_line(config: &PitlaneConfig, line_number: u32) -> CoreResult<()> {
    if line_number < 1 || line_number > config.lines_count {
        return Err(CoreError::validation(format!(
            "line number must be between 1 and {}",
            config.lines_count
        )));
    }
    Ok(())
}

fn check_shape(lines_count: Option<u32>, queue_size: Option<u32>) -> CoreResult<()> {
    if lines_count == Some(0) {
        return Err(CoreError::validation("lines count must be at least 1"));
    }
    if queue_size == Some(0) {
        return Err(CoreError::validation("queue size must be at least 1"));
    }
    Ok(())
}

fn config_for_race(tables: &Tables, race_id: RaceId) -> Option<PitlaneConfigId> {
    tables
        .live_rows::<PitlaneConfig>()
        .find(|(_, c)| c.race_id == race_id)
        .map(|(id, _)| id)
}

fn kart_entry(tables: &Tables, config_id: PitlaneConfigId, kart_id: KartId) -> Option<PitlaneEntryId> {
    tables
        .live_rows::<PitlaneCurrent>()
        .find(|(_, e)| e.pitlane_config_id == config_id && e.kart_id == kart_id)
        .map(|(id, _)| id)
}

/// Live entries of a line in position order.
pub fn line_entries(
    tables: &Tables,
    config_id: PitlaneConfigId,
    line_number: u32,
) -> Vec<(PitlaneEntryId, PitlaneCurrent)> {
    let mut entries: Vec<_> = tables
        .live_rows::<PitlaneCurrent>()
        .filter(|(_, e)| e.pitlane_config_id == config_id && e.line_number == line_number)
        .map(|(id, e)| (id, e.clone()))
        .collect();
    entries.sort_by_key(|(id, e)| (e.queue_position, *id));
    entries
}

fn live_records<E, F>(tables: &Tables, keep: F) -> Vec<Record<E>>
where
    E: crate::tables::StoredEntity,
    F: Fn(&E) -> bool,
{
    tables
        .scan::<E>()
        .filter(|r| r.body().is_some_and(&keep))
        .cloned()
        .collect()
}

fn newest_first(mut rows: Vec<Record<PitlaneHistory>>) -> Vec<Record<PitlaneHistory>> {
    rows.sort_by(|a, b| {
        let key = |r: &Record<PitlaneHistory>| (r.body().map(|h| h.exited_at), r.key);
        key(b).cmp(&key(a))
    });
    rows
}

fn set_kart_team(txn: &mut Transaction<'_>, kart_id: KartId, team_id: Option<TeamId>) {
    if let Some(mut kart) = txn.live::<Kart>(&kart_id).cloned() {
        if kart.team_id != team_id {
            kart.team_id = team_id;
            txn.write(kart_id, kart);
        }
    }
}

/// Writes the history row for `entry` and soft-deletes it.
fn exit_entry(
    txn: &mut Transaction<'_>,
    entry_id: PitlaneEntryId,
    entry: &PitlaneCurrent,
) -> Record<PitlaneHistory> {
    let history = txn.create(PitlaneHistory::from_exit(entry, txn.now()));
    txn.tombstone::<PitlaneCurrent>(entry_id);
    history
}

/// Moves every entry to the position matching its rank.
fn repack(txn: &mut Transaction<'_>, entries: &[(PitlaneEntryId, PitlaneCurrent)]) {
    for (rank, (id, entry)) in (0u32..).zip(entries) {
        if entry.queue_position != rank {
            let mut moved = entry.clone();
            moved.queue_position = rank;
            txn.write(*id, moved);
        }
    }
}

fn add_kart(
    txn: &mut Transaction<'_>,
    queue: QueueConfig,
    config_id: PitlaneConfigId,
    team_id: TeamId,
    kart_id: KartId,
    line_number: u32,
) -> CoreResult<AddOutcome> {
    let config = live_config(txn, config_id)?;
    check_line(&config, line_number)?;
    let kart = txn
        .live::<Kart>(&kart_id)
        .ok_or_else(|| CoreError::not_found(TableName::Karts, "kart not found"))?;
    if kart.race_id != config.race_id {
        return Err(CoreError::validation("kart does not belong to this race"));
    }
    if txn.live::<Team>(&team_id).is_none() {
        return Err(CoreError::not_found(TableName::Teams, "team not found"));
    }
    if kart_entry(txn, config_id, kart_id).is_some() {
        return Err(CoreError::conflict("kart is already in pitlane"));
    }

    set_kart_team(txn, kart_id, None);

    let queue_now = line_entries(txn, config_id, line_number);
    let capacity = config.queue_size as usize;
    let overflow = (queue_now.len() + 1).saturating_sub(capacity);
    let evict = match queue.head_eviction {
        HeadEviction::OnArrival if !queue_now.is_empty() => overflow.max(1),
        HeadEviction::OnArrival | HeadEviction::WhenFull => overflow,
    };

    let (heads, remaining) = queue_now.split_at(evict.min(queue_now.len()));
    let mut evicted = Vec::with_capacity(heads.len());
    for (index, (id, entry)) in heads.iter().enumerate() {
        evicted.push(exit_entry(txn, *id, entry));
        let new_team = match queue.eviction_policy {
            EvictionPolicy::AssignToArrivingTeam if index == 0 => team_id,
            EvictionPolicy::AssignToArrivingTeam | EvictionPolicy::ReturnToOwnTeam => entry.team_id,
        };
        set_kart_team(txn, entry.kart_id, Some(new_team));
    }
    repack(txn, remaining);

    let position = u32::try_from(remaining.len())
        .map_err(|_| CoreError::validation("pit-lane line is too long"))?;
    let now = txn.now();
    let entry = txn.create(PitlaneCurrent {
        pitlane_config_id: config_id,
        team_id,
        kart_id,
        line_number,
        queue_position: position,
        entered_at: now,
    });
    Ok(AddOutcome { entry, evicted })
}

fn remove_kart(
    txn: &mut Transaction<'_>,
    entry_id: PitlaneEntryId,
    assign_to: Option<TeamId>,
) -> CoreResult<Record<PitlaneHistory>> {
    let entry = txn
        .live::<PitlaneCurrent>(&entry_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found(TableName::PitlaneCurrent, "pitlane entry not found"))?;

    if let Some(team_id) = assign_to {
        if txn.live::<Team>(&team_id).is_none() {
            return Err(CoreError::not_found(TableName::Teams, "team not found"));
        }
        let race_id = match txn.live::<Kart>(&entry.kart_id) {
            Some(kart) => Some(kart.race_id),
            None => txn
                .live::<PitlaneConfig>(&entry.pitlane_config_id)
                .map(|c| c.race_id),
        };
        let held: Vec<KartId> = txn
            .live_rows::<Kart>()
            .filter(|(id, k)| {
                *id != entry.kart_id && Some(k.race_id) == race_id && k.team_id == Some(team_id)
            })
            .map(|(id, _)| id)
            .collect();
        for kart_id in held {
            set_kart_team(txn, kart_id, None);
        }
        set_kart_team(txn, entry.kart_id, Some(team_id));
    }

    let history = exit_entry(txn, entry_id, &entry);
    let behind: Vec<_> = line_entries(txn, entry.pitlane_config_id, entry.line_number)
        .into_iter()
        .filter(|(_, e)| e.queue_position > entry.queue_position)
        .collect();
    for (id, mut moved) in behind {
        moved.queue_position -= 1;
        txn.write(id, moved);
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::journal::MemoryJournal;
    use pitwall_protocol::Timestamp;

    struct Fixture {
        clock: Arc<ManualClock>,
        engine: QueueEngine,
        race: RaceId,
        config: PitlaneConfigId,
    }

    impl Fixture {
        fn new(queue: QueueConfig, lines: u32, size: u32) -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            let db = Arc::new(
                Database::open_with(
                    StoreConfig::server(),
                    Box::new(MemoryJournal::new()),
                    clock.clone(),
                )
                .unwrap(),
            );
            let race = db
                .transaction(|txn| {
                    Ok(txn
                        .create(Race {
                            name: "Winter Cup".into(),
                            date: "2024-12-01".into(),
                        })
                        .key)
                })
                .unwrap();
            let engine = QueueEngine::new(db, queue);
            let config = engine.create_config(race, lines, size).unwrap().key;
            Self {
                clock,
                engine,
                race,
                config,
            }
        }

        fn team(&self, id: i64) -> TeamId {
            self.engine
                .database()
                .transaction(|txn| {
                    Ok(txn
                        .write(TeamId(id), Team {
                            name: format!("Team {id}"),
                        })
                        .key)
                })
                .unwrap()
        }

        fn kart(&self, id: i64, team: Option<TeamId>) -> KartId {
            self.engine
                .database()
                .transaction(|txn| {
                    Ok(txn
                        .write(KartId(id), Kart {
                            race_id: self.race,
                            status: 1,
                            team_id: team,
                        })
                        .key)
                })
                .unwrap()
        }

        fn kart_team(&self, kart: KartId) -> Option<TeamId> {
            self.engine
                .database()
                .get::<Kart>(&kart)
                .and_then(|r| r.body().and_then(|k| k.team_id))
        }

        fn line(&self, line: u32) -> Vec<(KartId, u32)> {
            self.engine
                .current_by_line(self.config, line)
                .iter()
                .filter_map(|r| r.body().map(|e| (e.kart_id, e.queue_position)))
                .collect()
        }
    }

    #[test]
    fn first_kart_takes_the_head_and_loses_its_team() {
        let fx = Fixture::new(QueueConfig::new(), 1, 1);
        let team = fx.team(5);
        let kart = fx.kart(10, Some(team));

        let outcome = fx.engine.add_kart(fx.config, team, kart, 1).unwrap();
        assert!(outcome.evicted.is_empty());
        assert_eq!(fx.line(1), vec![(kart, 0)]);
        assert_eq!(fx.kart_team(kart), None);
    }

    #[test]
    fn arrival_evicts_head_to_arriving_team() {
        let fx = Fixture::new(QueueConfig::new(), 1, 1);
        let (t5, t7) = (fx.team(5), fx.team(7));
        let k10 = fx.kart(10, Some(t5));
        let k20 = fx.kart(20, Some(t7));
        fx.engine.add_kart(fx.config, t5, k10, 1).unwrap();
        fx.clock.advance(100);

        let outcome = fx.engine.add_kart(fx.config, t7, k20, 1).unwrap();
        assert_eq!(outcome.evicted.len(), 1);
        let history = outcome.evicted[0].body().unwrap();
        assert_eq!(history.kart_id, k10);
        assert_eq!(history.exited_at, Timestamp::from_millis(1_100));
        assert_eq!(fx.kart_team(k10), Some(t7));
        assert_eq!(fx.line(1), vec![(k20, 0)]);
        assert_eq!(fx.engine.history_by_config(fx.config).len(), 1);
    }

    #[test]
    fn arrival_evicts_head_back_to_own_team() {
        let queue = QueueConfig::new().with_eviction_policy(EvictionPolicy::ReturnToOwnTeam);
        let fx = Fixture::new(queue, 1, 1);
        let (t5, t7) = (fx.team(5), fx.team(7));
        let k10 = fx.kart(10, Some(t5));
        let k20 = fx.kart(20, Some(t7));
        fx.engine.add_kart(fx.config, t5, k10, 1).unwrap();
        fx.engine.add_kart(fx.config, t7, k20, 1).unwrap();
        assert_eq!(fx.kart_team(k10), Some(t5));
        assert_eq!(fx.line(1), vec![(k20, 0)]);
    }

    #[test]
    fn on_arrival_evicts_even_when_not_full() {
        let fx = Fixture::new(QueueConfig::new(), 1, 3);
        let team = fx.team(1);
        let (a, b) = (fx.kart(1, None), fx.kart(2, None));
        fx.engine.add_kart(fx.config, team, a, 1).unwrap();
        let outcome = fx.engine.add_kart(fx.config, team, b, 1).unwrap();
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(fx.line(1), vec![(b, 0)]);
    }

    #[test]
    fn when_full_fills_then_rotates() {
        let queue = QueueConfig::new().with_head_eviction(HeadEviction::WhenFull);
        let fx = Fixture::new(queue, 2, 3);
        let team = fx.team(1);
        let karts: Vec<_> = (1..=4).map(|i| fx.kart(i, None)).collect();
        for kart in &karts[..3] {
            assert!(fx.engine.add_kart(fx.config, team, *kart, 1).unwrap().evicted.is_empty());
        }
        assert_eq!(fx.line(1), vec![(karts[0], 0), (karts[1], 1), (karts[2], 2)]);

        let outcome = fx.engine.add_kart(fx.config, team, karts[3], 1).unwrap();
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(fx.line(1), vec![(karts[1], 0), (karts[2], 1), (karts[3], 2)]);
        assert!(fx.line(2).is_empty());
    }

    #[test]
    fn remove_from_middle_closes_gap_and_reassigns() {
        let queue = QueueConfig::new().with_head_eviction(HeadEviction::WhenFull);
        let fx = Fixture::new(queue, 1, 3);
        let (t1, t3) = (fx.team(1), fx.team(3));
        let old_kart_of_t3 = fx.kart(99, Some(t3));
        let karts: Vec<_> = (1..=3).map(|i| fx.kart(i, None)).collect();
        let mut entries = Vec::new();
        for kart in &karts {
            entries.push(fx.engine.add_kart(fx.config, t1, *kart, 1).unwrap().entry.key);
        }

        let history = fx.engine.remove_kart(entries[1], Some(t3)).unwrap();
        assert_eq!(history.body().unwrap().queue_position, 1);
        assert_eq!(fx.line(1), vec![(karts[0], 0), (karts[2], 1)]);
        assert_eq!(fx.kart_team(karts[1]), Some(t3));
        assert_eq!(fx.kart_team(old_kart_of_t3), None);
    }

    #[test]
    fn remove_missing_entry() {
        let fx = Fixture::new(QueueConfig::new(), 1, 1);
        let err = fx.engine.remove_kart(PitlaneEntryId(404), None).unwrap_err();
        assert_eq!(err.to_string(), "pitlane entry not found");

        let team = fx.team(1);
        let kart = fx.kart(1, None);
        let entry = fx.engine.add_kart(fx.config, team, kart, 1).unwrap().entry.key;
        fx.engine.remove_kart(entry, None).unwrap();
        assert!(matches!(
            fx.engine.remove_kart(entry, None),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn preconditions_leave_store_untouched() {
        let fx = Fixture::new(QueueConfig::new(), 2, 2);
        let team = fx.team(1);
        let kart = fx.kart(1, Some(team));
        let before = fx.engine.database().stats().transactions_committed;

        let err = fx.engine.add_kart(fx.config, team, kart, 3).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: line number must be between 1 and 2");
        let err = fx.engine.add_kart(PitlaneConfigId(1), team, kart, 1).unwrap_err();
        assert_eq!(err.to_string(), "pitlane config not found");

        fx.engine.add_kart(fx.config, team, kart, 1).unwrap();
        let err = fx.engine.add_kart(fx.config, team, kart, 2).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(
            fx.engine.database().stats().transactions_committed,
            before + 1
        );
    }

    #[test]
    fn clear_line_writes_history_for_each() {
        let queue = QueueConfig::new().with_head_eviction(HeadEviction::WhenFull);
        let fx = Fixture::new(queue, 2, 3);
        let team = fx.team(1);
        for i in 1..=3 {
            let kart = fx.kart(i, None);
            fx.engine.add_kart(fx.config, team, kart, 2).unwrap();
        }
        assert_eq!(fx.engine.clear_line(fx.config, 2).unwrap(), 3);
        assert!(fx.line(2).is_empty());
        assert_eq!(fx.engine.history_by_line(fx.config, 2).len(), 3);
        assert_eq!(fx.engine.clear_line(fx.config, 1).unwrap(), 0);
    }

    #[test]
    fn over_full_line_is_trimmed_on_arrival() {
        let queue = QueueConfig::new().with_head_eviction(HeadEviction::WhenFull);
        let fx = Fixture::new(queue, 1, 3);
        let team = fx.team(1);
        for i in 1..=3 {
            let kart = fx.kart(i, None);
            fx.engine.add_kart(fx.config, team, kart, 1).unwrap();
        }
        fx.engine.update_config(fx.config, None, Some(1)).unwrap();

        let kart = fx.kart(4, None);
        let outcome = fx.engine.add_kart(fx.config, team, kart, 1).unwrap();
        assert_eq!(outcome.evicted.len(), 3);
        assert_eq!(fx.line(1), vec![(kart, 0)]);
    }

    #[test]
    fn team_kart_resolution() {
        let fx = Fixture::new(QueueConfig::new(), 1, 2);
        let (t1, t2) = (fx.team(1), fx.team(2));
        let err = fx.engine.add_team_kart(fx.config, t1, 1).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: team has no assigned kart");

        let kart = fx.kart(1, Some(t1));
        let outcome = fx.engine.add_team_kart(fx.config, t1, 1).unwrap();
        assert_eq!(outcome.entry.body().unwrap().kart_id, kart);

        fx.kart(2, Some(t2));
        fx.kart(3, Some(t2));
        let err = fx.engine.add_team_kart(fx.config, t2, 1).unwrap_err();
        assert_eq!(err.to_string(), "conflict: team has multiple assigned karts");
    }

    #[test]
    fn config_lifecycle() {
        let fx = Fixture::new(QueueConfig::new(), 1, 1);
        let err = fx.engine.create_config(fx.race, 2, 2).unwrap_err();
        assert_eq!(err.to_string(), "conflict: pitlane config already exists for this race");
        assert!(matches!(
            fx.engine.update_config(fx.config, Some(0), None),
            Err(CoreError::Validation { .. })
        ));
        let updated = fx.engine.update_config(fx.config, Some(4), None).unwrap();
        assert_eq!(updated.body().unwrap().lines_count, 4);
        assert_eq!(fx.engine.config_for_race(fx.race).unwrap().key, fx.config);

        let team = fx.team(1);
        let kart = fx.kart(1, None);
        let exited = fx.engine.add_kart(fx.config, team, kart, 1).unwrap().entry.key;
        let exit = fx.engine.remove_kart(exited, None).unwrap().key;
        let kart = fx.kart(2, None);
        let queued = fx.engine.add_kart(fx.config, team, kart, 2).unwrap().entry.key;

        fx.engine.delete_config(fx.config).unwrap();
        assert!(fx.engine.config_for_race(fx.race).is_none());
        assert!(fx.engine.database().get::<PitlaneCurrent>(&queued).unwrap().is_tombstone());
        assert!(fx.engine.database().get::<PitlaneHistory>(&exit).unwrap().is_tombstone());
        assert_eq!(fx.engine.database().read(|t| t.count::<PitlaneHistory>().live), 0);
        assert!(matches!(
            fx.engine.delete_config(fx.config),
            Err(CoreError::NotFound { .. })
        ));
        assert!(fx.engine.create_config(fx.race, 1, 1).is_ok());
    }

    #[test]
    fn history_is_newest_first() {
        let queue = QueueConfig::new().with_head_eviction(HeadEviction::WhenFull);
        let fx = Fixture::new(queue, 1, 3);
        let team = fx.team(1);
        let mut entries = Vec::new();
        for i in 1..=3 {
            let kart = fx.kart(i, None);
            entries.push(fx.engine.add_kart(fx.config, team, kart, 1).unwrap().entry.key);
        }
        for entry in entries {
            fx.clock.advance(10);
            fx.engine.remove_kart(entry, None).unwrap();
        }
        let exits: Vec<_> = fx
            .engine
            .history_by_config(fx.config)
            .iter()
            .map(|r| r.body().unwrap().exited_at.as_millis())
            .collect();
        assert_eq!(exits, vec![1_030, 1_020, 1_010]);
    }
}
