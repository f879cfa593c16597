//! Race-day walkthroughs of the queue engine.

use pitwall_core::{EvictionPolicy, HeadEviction, QueueConfig};
use pitwall_protocol::{Kart, KartId, PitlaneCurrent, PitlaneHistory, TeamId};
use pitwall_testkit::prelude::*;

fn kart_team(store: &TestStore, kart: KartId) -> Option<TeamId> {
    store.get::<Kart>(&kart).unwrap().body().unwrap().team_id
}

fn line_karts(store: &TestStore, day: &RaceDay, line: u32) -> Vec<(KartId, u32)> {
    store
        .queue(QueueConfig::default())
        .current_by_line(day.config, line)
        .iter()
        .filter_map(|r| r.body().map(|e| (e.kart_id, e.queue_position)))
        .collect()
}

#[test]
fn first_kart_into_an_empty_line() {
    let store = TestStore::server();
    let day = RaceDay::seed(&store, 1, 1, 2, 0);
    let queue = store.queue(QueueConfig::default());

    let outcome = queue.add_kart(day.config, day.teams[0], day.karts[0], 1).unwrap();

    assert!(outcome.evicted.is_empty());
    assert_eq!(line_karts(&store, &day, 1), vec![(day.karts[0], 0)]);
    assert_eq!(kart_team(&store, day.karts[0]), None);
    assert_queue_invariants(&store);
}

fn second_kart_evicts_head(policy: EvictionPolicy) -> (TestStore, RaceDay) {
    let store = TestStore::server();
    let day = RaceDay::seed(&store, 1, 1, 2, 0);
    let queue = store.queue(QueueConfig::new().with_eviction_policy(policy));

    queue.add_kart(day.config, day.teams[0], day.karts[0], 1).unwrap();
    store.clock.advance(60_000);
    let outcome = queue.add_kart(day.config, day.teams[1], day.karts[1], 1).unwrap();

    assert_eq!(outcome.evicted.len(), 1);
    let exit = outcome.evicted[0].body().unwrap();
    assert_eq!(exit.kart_id, day.karts[0]);
    assert_eq!(exit.exited_at.as_millis() - exit.entered_at.as_millis(), 60_000);
    assert_eq!(line_karts(&store, &day, 1), vec![(day.karts[1], 0)]);

    let history = queue.history_by_config(day.config);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body().unwrap().kart_id, day.karts[0]);
    assert_queue_invariants(&store);
    (store, day)
}

#[test]
fn evicted_kart_goes_to_arriving_team() {
    let (store, day) = second_kart_evicts_head(EvictionPolicy::AssignToArrivingTeam);
    assert_eq!(kart_team(&store, day.karts[0]), Some(day.teams[1]));
    assert_eq!(kart_team(&store, day.karts[1]), None);
}

#[test]
fn evicted_kart_returns_to_own_team() {
    let (store, day) = second_kart_evicts_head(EvictionPolicy::ReturnToOwnTeam);
    assert_eq!(kart_team(&store, day.karts[0]), Some(day.teams[0]));
    assert_eq!(kart_team(&store, day.karts[1]), None);
}

#[test]
fn removing_from_the_middle_of_a_deep_queue() {
    let store = TestStore::server();
    let day = RaceDay::seed(&store, 1, 3, 4, 0);
    let queue = store.queue(QueueConfig::new().with_head_eviction(HeadEviction::WhenFull));

    for n in 0..3 {
        queue.add_kart(day.config, day.teams[n], day.karts[n], 1).unwrap();
        store.tick();
    }
    let middle = queue.current_by_line(day.config, 1)[1].clone();
    let middle_entry: PitlaneCurrent = middle.body().unwrap().clone();
    assert_eq!(middle_entry.kart_id, day.karts[1]);

    // teams[3] still drives karts[3]; taking the departing kart unassigns it.
    let before = live_entries(&store);
    let exit = queue.remove_kart(middle.key, Some(day.teams[3])).unwrap();

    assert!(exit.body().unwrap().records_exit_of(&middle_entry));
    assert_eq!(exit.body().unwrap().queue_position, 1);
    assert!(store.get::<PitlaneCurrent>(&middle.key).unwrap().is_tombstone());
    assert_eq!(
        line_karts(&store, &day, 1),
        vec![(day.karts[0], 0), (day.karts[2], 1)]
    );
    assert_eq!(kart_team(&store, day.karts[1]), Some(day.teams[3]));
    assert_eq!(kart_team(&store, day.karts[3]), None);
    assert_eq!(store.read(|t| t.count::<PitlaneHistory>().live), 1);
    assert_exits_recorded(&before, &store);
    assert_queue_invariants(&store);
}

#[test]
fn clearing_a_line_records_every_exit() {
    let store = TestStore::server();
    let day = RaceDay::seed(&store, 2, 3, 3, 0);
    let queue = store.queue(QueueConfig::new().with_head_eviction(HeadEviction::WhenFull));
    for n in 0..3 {
        queue.add_kart(day.config, day.teams[n], day.karts[n], 2).unwrap();
    }

    let before = live_entries(&store);
    assert_eq!(queue.clear_line(day.config, 2).unwrap(), 3);
    assert_eq!(queue.clear_line(day.config, 1).unwrap(), 0);

    assert!(line_karts(&store, &day, 2).is_empty());
    assert_eq!(queue.history_by_line(day.config, 2).len(), 3);
    assert_exits_recorded(&before, &store);
}
