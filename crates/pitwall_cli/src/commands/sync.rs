//! Sync command implementation.

use super::CliResult;
use pitwall_core::{Database, StoreConfig};
use pitwall_sync_engine::{
    CycleReport, HttpTransport, SyncConfig, SyncEngine, SyncMonitor, SyncOutcome,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Syncs the replica at `path` with `server_url`.
///
/// Runs one cycle, or with `watch` keeps the status monitor running and
/// asks for a cycle every `interval` until Ctrl-C.
pub fn run(path: &Path, server_url: &str, watch: bool, interval: Duration) -> CliResult<()> {
    let db = Arc::new(Database::open(path, StoreConfig::replica())?);
    let config = SyncConfig::new(server_url).with_retry_interval(interval);
    let transport = HttpTransport::new(&config)?;
    info!(url = transport.url(), "syncing replica");
    let engine = Arc::new(SyncEngine::new(db, transport, config));

    let runtime = tokio::runtime::Runtime::new()?;
    if watch {
        runtime.block_on(watch_loop(engine, interval));
        Ok(())
    } else {
        runtime.block_on(once(&engine))
    }
}

async fn once(engine: &SyncEngine<HttpTransport>) -> CliResult<()> {
    match engine.sync().await? {
        SyncOutcome::Completed(report) => print_report(&report),
        SyncOutcome::Skipped => println!("Another sync is already running"),
    }
    Ok(())
}

async fn watch_loop(engine: Arc<SyncEngine<HttpTransport>>, interval: Duration) {
    let monitor = SyncMonitor::new(engine);
    let mut status = monitor.subscribe();
    monitor.start();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The monitor syncs on start; skip the immediate tick.
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("status: {}", *status.borrow_and_update());
            }
            _ = ticker.tick() => {
                monitor.trigger_sync();
            }
            _ = &mut ctrl_c => break,
        }
    }
    monitor.stop().await;
}

fn print_report(report: &CycleReport) {
    println!("Sync completed in {} ms", report.duration.as_millis());
    println!("  Pushed:     {}", report.pushed);
    println!("  Pulled:     {}", report.pulled);
    println!(
        "  Merged:     {} inserted, {} replaced, {} removed, {} stale",
        report.merge.inserted, report.merge.replaced, report.merge.removed, report.merge.stale
    );
    if report.merge.orphaned > 0 {
        println!("  Orphaned:   {}", report.merge.orphaned);
    }
    if report.merge.slots_released > 0 {
        println!("  Released:   {} pit-lane slots", report.merge.slots_released);
    }
    println!("  Purged:     {}", report.purged);
    println!("  Checkpoint: {}", report.checkpoint);
}
