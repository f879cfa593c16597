//! The push-then-pull sync cycle.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use pitwall_core::merge::purge_acknowledged;
use pitwall_core::{apply_change_set, Database, MergeReport};
use pitwall_protocol::{SyncRequest, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// What one call to [`SyncEngine::sync`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A full cycle ran and the checkpoint advanced.
    Completed(CycleReport),
    /// Another cycle was already in flight; nothing was done.
    Skipped,
}

impl SyncOutcome {
    /// The cycle report, if a cycle ran.
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped => None,
        }
    }
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Records sent to the server.
    pub pushed: usize,
    /// Records received from the server.
    pub pulled: usize,
    /// What the merge did with them.
    pub merge: MergeReport,
    /// Local tombstones dropped after the server saw them.
    pub purged: usize,
    /// The new checkpoint.
    pub checkpoint: Timestamp,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of cycles that failed.
    pub cycles_failed: u64,
    /// Cycles skipped because one was in flight.
    pub cycles_skipped: u64,
    /// Total number of records pushed.
    pub records_pushed: u64,
    /// Total number of records pulled.
    pub records_pulled: u64,
    /// Queue slots released to make room for incoming entries.
    pub slots_released: u64,
    /// Incoming rows skipped because a parent was missing.
    pub orphans_skipped: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Runs sync cycles for one replica.
///
/// At most one cycle runs at a time; an overlapping call returns
/// [`SyncOutcome::Skipped`] straight away.
pub struct SyncEngine<T: SyncTransport> {
    db: Arc<Database>,
    transport: T,
    config: SyncConfig,
    is_syncing: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(db: Arc<Database>, transport: T, config: SyncConfig) -> Self {
        Self {
            db,
            transport,
            config,
            is_syncing: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// The replica store.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The transport in use.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// Performs one push-then-pull cycle.
    ///
    /// Outgoing rows are chosen against the push watermark, which is on the
    /// local clock; incoming rows are requested against the checkpoint, which
    /// is on the server clock. On any error both are left where they were, so
    /// the next cycle sends the same delta again.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        self.sync_observed(|| {}).await
    }

    /// Like [`sync`](Self::sync), calling `started` once this call owns the
    /// cycle. A skipped call never runs `started`.
    pub async fn sync_observed(&self, started: impl FnOnce()) -> SyncResult<SyncOutcome> {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in flight, skipping");
            self.stats.write().cycles_skipped += 1;
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = InFlight(&self.is_syncing);
        started();

        let start = Instant::now();
        match self.run_cycle(start).await {
            Ok(report) => {
                info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    applied = report.merge.applied(),
                    purged = report.purged,
                    checkpoint = %report.checkpoint,
                    elapsed_ms = report.duration.as_millis() as u64,
                    "sync cycle completed"
                );
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.records_pushed += report.pushed as u64;
                stats.records_pulled += report.pulled as u64;
                stats.slots_released += report.merge.slots_released as u64;
                stats.orphans_skipped += report.merge.orphaned as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                Ok(SyncOutcome::Completed(report))
            }
            Err(err) => {
                error!(error = %err, retryable = err.is_retryable(), "sync cycle failed");
                let mut stats = self.stats.write();
                stats.cycles_failed += 1;
                stats.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_cycle(&self, start: Instant) -> SyncResult<CycleReport> {
        // Read before collecting: later writes are stamped after it.
        let local_now = self.db.now();
        let pushed_through = self.db.pushed_through();
        let since = self.db.checkpoint();
        let request = SyncRequest::new(since, self.db.changes_since(pushed_through));
        debug!(
            since = %since,
            pushed_through = %pushed_through,
            outgoing = request.changes.len(),
            "pushing local changes"
        );

        let response = tokio::time::timeout(self.config.timeout, self.transport.exchange(&request))
            .await
            .map_err(|_| SyncError::Timeout)??;

        let (merge, purged) = self.db.transaction(|txn| {
            let merge = apply_change_set(txn, &response.changes)?;
            txn.set_checkpoint(response.server_timestamp);
            txn.set_pushed_through(local_now);
            let purged = purge_acknowledged(txn, &request.changes);
            Ok((merge, purged))
        })?;

        Ok(CycleReport {
            pushed: request.changes.len(),
            pulled: response.changes.len(),
            merge,
            purged,
            checkpoint: response.server_timestamp,
            duration: start.elapsed(),
        })
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
