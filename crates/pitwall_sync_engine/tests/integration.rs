//! Replicas syncing through an in-process server.
//!
//! Every exchange round-trips through the JSON wire format, and each store
//! runs on its own manual clock so timestamps are deterministic.

use async_trait::async_trait;
use pitwall_core::QueueConfig;
use pitwall_protocol::{Kart, KartId, PitlaneCurrent, SyncRequest, SyncResponse, Team};
use pitwall_sync_engine::{CycleReport, SyncConfig, SyncEngine, SyncError, SyncResult, SyncTransport};
use pitwall_sync_server::{ServerConfig, SyncServer};
use pitwall_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Calls the server directly, encoding both directions as JSON.
struct Loopback {
    server: Arc<SyncServer>,
    online: AtomicBool,
}

impl Loopback {
    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncTransport for Loopback {
    async fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("link down"));
        }
        let request = SyncRequest::from_json(&request.to_json()?)?;
        let response = self
            .server
            .handle_sync(request)
            .map_err(|e| SyncError::Server {
                status: e.status_code().as_u16(),
                message: e.to_string(),
            })?;
        Ok(SyncResponse::from_json(&response.to_json()?)?)
    }
}

struct Replica {
    store: TestStore,
    link: Arc<Loopback>,
    engine: SyncEngine<Arc<Loopback>>,
}

impl Replica {
    fn new(server: &Arc<SyncServer>, start: i64) -> Self {
        let store = TestStore::replica();
        store.clock.set(start);
        let link = Arc::new(Loopback {
            server: server.clone(),
            online: AtomicBool::new(true),
        });
        let engine = SyncEngine::new(store.db.clone(), link.clone(), SyncConfig::default());
        Self { store, link, engine }
    }
}

struct Rig {
    server: TestStore,
    day: RaceDay,
    a: Replica,
    b: Replica,
}

impl Rig {
    /// A seeded server and two replicas that have pulled it.
    async fn new() -> Self {
        let server = TestStore::server();
        let day = RaceDay::seed(&server, 2, 2, 3, 1);
        let sync_server = Arc::new(SyncServer::new(server.db.clone(), ServerConfig::default()));
        let rig = Self {
            a: Replica::new(&sync_server, 20_000),
            b: Replica::new(&sync_server, 30_000),
            server,
            day,
        };
        rig.sync(&rig.a).await;
        rig.sync(&rig.b).await;
        rig
    }

    /// Runs one cycle, moving the server clock before it and the replica
    /// clock after it.
    async fn sync(&self, replica: &Replica) -> CycleReport {
        self.server.clock.advance(10);
        let outcome = replica.engine.sync().await.unwrap();
        replica.store.tick();
        outcome.report().cloned().unwrap()
    }

    fn queue(store: &TestStore) -> pitwall_core::QueueEngine {
        store.queue(QueueConfig::default())
    }
}

fn kart_status(store: &TestStore, kart: &KartId) -> u8 {
    store.get::<Kart>(kart).unwrap().body().unwrap().status
}

#[tokio::test]
async fn replicas_pull_the_seeded_race_day() {
    let rig = Rig::new().await;
    assert_converged(&rig.a.store, &rig.server);
    assert_converged(&rig.b.store, &rig.server);
    assert_eq!(rig.a.store.checkpoint().as_millis(), START_MILLIS + 10);
    assert_eq!(rig.b.store.checkpoint().as_millis(), START_MILLIS + 20);
}

#[tokio::test]
async fn queue_writes_from_two_replicas_converge() {
    let rig = Rig::new().await;
    let day = &rig.day;

    Rig::queue(&rig.a.store)
        .add_kart(day.config, day.teams[0], day.karts[0], 1)
        .unwrap();
    Rig::queue(&rig.b.store)
        .add_kart(day.config, day.teams[1], day.karts[1], 2)
        .unwrap();

    // Each side sends its entry and the kart it took off its team.
    let first = rig.sync(&rig.a).await;
    assert_eq!(first.pushed, 2);
    let second = rig.sync(&rig.b).await;
    assert_eq!(second.pushed, 2);
    assert_eq!(second.merge.inserted, 1);
    assert_eq!(second.merge.replaced, 1);
    rig.sync(&rig.a).await;

    assert_converged(&rig.a.store, &rig.b.store);
    assert_converged(&rig.a.store, &rig.server);
    for store in [&rig.a.store, &rig.b.store, &rig.server] {
        assert_queue_invariants(store);
        assert_eq!(Rig::queue(store).current_by_config(day.config).len(), 2);
    }
}

#[tokio::test]
async fn newer_write_wins_on_both_sides() {
    let rig = Rig::new().await;
    let kart = rig.day.karts[0];

    // The replica's edit is newer.
    rig.server.tick();
    rig.server.roster().set_kart_status(kart, 3).unwrap();
    rig.a.store.roster().set_kart_status(kart, 4).unwrap();
    rig.sync(&rig.a).await;
    assert_eq!(kart_status(&rig.server, &kart), 4);
    assert_eq!(kart_status(&rig.a.store, &kart), 4);

    // The server's edit is newer.
    rig.server.clock.set(90_000);
    rig.server.roster().set_kart_status(kart, 5).unwrap();
    rig.a.store.roster().set_kart_status(kart, 2).unwrap();
    let report = rig.sync(&rig.a).await;
    assert_eq!(report.merge.replaced, 1);
    assert_eq!(kart_status(&rig.server, &kart), 5);
    assert_eq!(kart_status(&rig.a.store, &kart), 5);

    rig.sync(&rig.b).await;
    assert_eq!(kart_status(&rig.b.store, &kart), 5);
    assert_converged(&rig.a.store, &rig.b.store);
}

#[tokio::test]
async fn late_push_reaches_a_replica_that_synced_since() {
    let rig = Rig::new().await;
    let team = rig.a.store.roster().create_team("Late Arrivals").unwrap().key;

    // B syncs after A's write but before A pushes it, and its checkpoint
    // lands well past A's clock.
    rig.server.clock.set(50_000);
    rig.sync(&rig.b).await;
    assert!(rig.b.store.checkpoint().as_millis() > 20_001);
    rig.sync(&rig.a).await;
    assert!(rig.b.store.get::<Team>(&team).is_none());

    rig.sync(&rig.b).await;
    assert_eq!(
        rig.b.store.get::<Team>(&team).unwrap().body().unwrap().name,
        "Late Arrivals"
    );
}

#[tokio::test]
async fn failed_exchange_keeps_checkpoint_and_delta() {
    let rig = Rig::new().await;
    let team = rig.a.store.roster().create_team("Offline FC").unwrap().key;
    let checkpoint = rig.a.store.checkpoint();
    let watermark = rig.a.store.pushed_through();

    rig.a.link.set_online(false);
    let err = rig.a.engine.sync().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(rig.a.store.checkpoint(), checkpoint);
    assert_eq!(rig.a.store.pushed_through(), watermark);
    assert!(rig.server.get::<Team>(&team).is_none());

    rig.a.link.set_online(true);
    let report = rig.sync(&rig.a).await;
    assert_eq!(report.pushed, 1);
    assert!(rig.server.get::<Team>(&team).is_some());
    assert_eq!(rig.a.engine.stats().cycles_failed, 1);
}

#[tokio::test]
async fn removal_travels_as_a_tombstone() {
    let rig = Rig::new().await;
    let day = &rig.day;
    let entry = Rig::queue(&rig.a.store)
        .add_kart(day.config, day.teams[0], day.karts[0], 1)
        .unwrap()
        .entry
        .key;
    rig.sync(&rig.a).await;
    rig.sync(&rig.b).await;
    assert!(rig.b.store.get::<PitlaneCurrent>(&entry).is_some());

    Rig::queue(&rig.a.store).remove_kart(entry, None).unwrap();
    assert!(rig.a.store.get::<PitlaneCurrent>(&entry).unwrap().is_tombstone());
    let report = rig.sync(&rig.a).await;
    assert_eq!(report.purged, 1);
    assert!(rig.a.store.get::<PitlaneCurrent>(&entry).is_none());
    assert!(rig.server.get::<PitlaneCurrent>(&entry).unwrap().is_tombstone());

    rig.sync(&rig.b).await;
    assert!(rig
        .b
        .store
        .get::<PitlaneCurrent>(&entry)
        .map_or(true, |r| r.is_tombstone()));
    let history = Rig::queue(&rig.b.store).history_by_config(day.config);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body().unwrap().kart_id, day.karts[0]);
    assert_converged(&rig.a.store, &rig.b.store);
}

#[tokio::test]
async fn colliding_slots_resolve_to_the_later_push() {
    let rig = Rig::new().await;
    let day = &rig.day;

    // Both replicas put a kart at the head of line 1 while apart.
    let first = Rig::queue(&rig.a.store)
        .add_kart(day.config, day.teams[0], day.karts[0], 1)
        .unwrap()
        .entry
        .key;
    let second = Rig::queue(&rig.b.store)
        .add_kart(day.config, day.teams[1], day.karts[1], 1)
        .unwrap()
        .entry
        .key;

    rig.sync(&rig.a).await;
    let report = rig.sync(&rig.b).await;
    assert_eq!(report.merge.slots_released, 0);
    assert!(rig.server.get::<PitlaneCurrent>(&first).unwrap().is_tombstone());
    assert!(rig.server.get::<PitlaneCurrent>(&second).unwrap().is_live());
    rig.sync(&rig.a).await;

    assert!(rig.a.store.get::<PitlaneCurrent>(&first).is_none());
    for store in [&rig.a.store, &rig.b.store, &rig.server] {
        assert_queue_invariants(store);
        let line = Rig::queue(store).current_by_config(day.config);
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].key, second);
    }
    assert_converged(&rig.a.store, &rig.b.store);
    assert_converged(&rig.a.store, &rig.server);
}
