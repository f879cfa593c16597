//! Test fixtures and store helpers.
//!
//! Provides stores driven by a manual clock and a seeded race day for
//! queue and sync tests.

use pitwall_core::{Database, ManualClock, QueueConfig, QueueEngine, Roster, StoreConfig};
use pitwall_protocol::{KartId, PitlaneConfigId, RaceId, TeamId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Clock reading every fixture store starts at.
pub const START_MILLIS: i64 = 1_000;

const STORE_DIR: &str = "store";

/// A test store with a manual clock and automatic cleanup.
pub struct TestStore {
    /// The store.
    pub db: Arc<Database>,
    /// The clock stamping every write.
    pub clock: Arc<ManualClock>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory(config: StoreConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let db = Database::open_with(
            config,
            Box::new(pitwall_core::journal::MemoryJournal::new()),
            clock.clone(),
        )
        .expect("Failed to open in-memory store");
        Self {
            db: Arc::new(db),
            clock,
            _temp_dir: None,
        }
    }

    /// Creates an in-memory server store (tombstones retained).
    pub fn server() -> Self {
        Self::memory(StoreConfig::server())
    }

    /// Creates an in-memory device replica (tombstones purged).
    pub fn replica() -> Self {
        Self::memory(StoreConfig::replica())
    }

    /// Creates a store in a temporary directory.
    pub fn file(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let db = Database::open_with_clock(&temp_dir.path().join(STORE_DIR), config, clock.clone())
            .expect("Failed to open file store");
        Self {
            db: Arc::new(db),
            clock,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join(STORE_DIR))
    }

    /// Closes and reopens a file store, replaying its journal.
    ///
    /// Every other handle on the store must have been dropped.
    pub fn reopen(self) -> Self {
        self.reopen_after(|_| {})
    }

    /// Closes a file store, runs `between` on its directory, then reopens it.
    ///
    /// Used to tamper with the journal while no handle is open.
    pub fn reopen_after(self, between: impl FnOnce(&Path)) -> Self {
        let Self {
            db,
            clock,
            _temp_dir,
        } = self;
        let config = db.config().clone();
        drop(db);
        let temp_dir = _temp_dir.expect("Only file stores can be reopened");
        between(&temp_dir.path().join(STORE_DIR));
        let db = Database::open_with_clock(&temp_dir.path().join(STORE_DIR), config, clock.clone())
            .expect("Failed to reopen file store");
        Self {
            db: Arc::new(db),
            clock,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Moves the clock forward by one millisecond.
    pub fn tick(&self) {
        self.clock.advance(1);
    }

    /// Queue engine over this store.
    pub fn queue(&self, config: QueueConfig) -> QueueEngine {
        QueueEngine::new(self.db.clone(), config)
    }

    /// Roster writers over this store.
    pub fn roster(&self) -> Roster {
        Roster::new(self.db.clone())
    }
}

impl std::ops::Deref for TestStore {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with an in-memory server store.
///
/// # Example
///
/// ```rust,ignore
/// use pitwall_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         let team = store.roster().create_team("Falcons").unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::server();
    f(&store)
}

/// Runs a test with an on-disk server store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::file(StoreConfig::server());
    f(&store)
}

/// A seeded race day.
#[derive(Debug, Clone)]
pub struct RaceDay {
    /// The race.
    pub race: RaceId,
    /// Its pit-lane configuration.
    pub config: PitlaneConfigId,
    /// Teams entered in the race, numbered "1", "2", ...
    pub teams: Vec<TeamId>,
    /// `karts[i]` is driven by `teams[i]`.
    pub karts: Vec<KartId>,
    /// Unassigned karts.
    pub spares: Vec<KartId>,
}

impl RaceDay {
    /// Seeds a race with `teams` teams, one kart each, plus `spares`
    /// unassigned karts and a `lines` x `queue_size` pit lane.
    pub fn seed(store: &TestStore, lines: u32, queue_size: u32, teams: usize, spares: usize) -> Self {
        let roster = store.roster();
        let race = roster
            .create_race("Test Race", "2024-05-18")
            .expect("Failed to create race")
            .key;
        let config = store
            .queue(QueueConfig::default())
            .create_config(race, lines, queue_size)
            .expect("Failed to create pit-lane config")
            .key;

        let mut team_ids = Vec::with_capacity(teams);
        let mut karts = Vec::with_capacity(teams);
        for n in 1..=teams {
            let team = roster
                .create_team(&format!("Team {n}"))
                .expect("Failed to create team")
                .key;
            roster
                .add_team_to_race(race, team, Some(&n.to_string()))
                .expect("Failed to enter team");
            let kart = roster
                .create_kart(race, None, Some(team))
                .expect("Failed to create kart")
                .key;
            team_ids.push(team);
            karts.push(kart);
        }
        let spares = (0..spares)
            .map(|_| {
                roster
                    .create_kart(race, None, None)
                    .expect("Failed to create spare kart")
                    .key
            })
            .collect();

        Self {
            race,
            config,
            teams: team_ids,
            karts,
            spares,
        }
    }

    /// Every kart of the race, team karts first.
    pub fn all_karts(&self) -> Vec<KartId> {
        self.karts.iter().chain(&self.spares).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_protocol::{Kart, PitlaneConfig};

    #[test]
    fn test_memory_store() {
        let store = TestStore::server();
        assert!(store.path().is_none());
        assert_eq!(store.now().as_millis(), START_MILLIS);
        store.tick();
        assert_eq!(store.now().as_millis(), START_MILLIS + 1);
    }

    #[test]
    fn test_file_store_reopens() {
        let store = TestStore::file(StoreConfig::server());
        assert!(store.path().is_some());
        let team = store.roster().create_team("Falcons").unwrap().key;

        let store = store.reopen();
        assert!(store.get::<pitwall_protocol::Team>(&team).is_some());
    }

    #[test]
    fn test_race_day_seed() {
        with_temp_store(|store| {
            let day = RaceDay::seed(store, 2, 3, 4, 1);
            assert_eq!(day.teams.len(), 4);
            assert_eq!(day.all_karts().len(), 5);

            let config = store.get::<PitlaneConfig>(&day.config).unwrap();
            assert_eq!(config.body().unwrap().lines_count, 2);
            for (team, kart) in day.teams.iter().zip(&day.karts) {
                let kart = store.get::<Kart>(kart).unwrap();
                assert_eq!(kart.body().unwrap().team_id, Some(*team));
            }
            let spare = store.get::<Kart>(&day.spares[0]).unwrap();
            assert_eq!(spare.body().unwrap().team_id, None);
        });
    }
}
