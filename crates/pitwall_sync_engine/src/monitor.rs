//! Connectivity status and the background sync task.
//!
//! ```text
//!   Offline ──cycle starts──▶ Syncing ──ok──▶ Online
//!      ▲                         │              │
//!      └────────failure──────────┴──────────────┘
//! ```
//!
//! A failed cycle always lands in `Offline`. While offline the task retries
//! on a fixed interval and [`SyncMonitor::trigger_sync`] is a no-op.

use crate::engine::{SyncEngine, SyncOutcome};
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Connectivity as seen by the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The last cycle failed, or none has run yet.
    Offline,
    /// A cycle is in flight.
    Syncing,
    /// The last cycle succeeded.
    Online,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Online => "online",
        })
    }
}

struct Shared<T: SyncTransport> {
    engine: Arc<SyncEngine<T>>,
    status: watch::Sender<SyncStatus>,
}

impl<T: SyncTransport> Shared<T> {
    fn set_status(&self, next: SyncStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(status = %next, "sync status changed");
        }
    }

    async fn cycle(&self) -> bool {
        let outcome = self
            .engine
            .sync_observed(|| self.set_status(SyncStatus::Syncing))
            .await;
        match outcome {
            Ok(SyncOutcome::Completed(_)) => {
                self.set_status(SyncStatus::Online);
                true
            }
            Ok(SyncOutcome::Skipped) => {
                let status = *self.status.borrow();
                debug!(%status, "cycle already in flight, status kept");
                false
            }
            Err(err) => {
                warn!(error = %err, "sync failed, going offline");
                self.set_status(SyncStatus::Offline);
                false
            }
        }
    }
}

struct Running {
    signals: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Publishes sync status and drives background cycles.
pub struct SyncMonitor<T: SyncTransport + 'static> {
    shared: Arc<Shared<T>>,
    retry_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl<T: SyncTransport + 'static> SyncMonitor<T> {
    /// Creates a monitor over `engine`, starting `Offline`.
    pub fn new(engine: Arc<SyncEngine<T>>) -> Self {
        let retry_interval = engine.config().retry_interval;
        let (status, _) = watch::channel(SyncStatus::Offline);
        Self {
            shared: Arc::new(Shared { engine, status }),
            retry_interval,
            running: Mutex::new(None),
        }
    }

    /// The engine driven by this monitor.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.shared.engine
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        *self.shared.status.borrow()
    }

    /// Subscribes to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Returns true while the background task is running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawns the background task, which syncs once straight away.
    ///
    /// Must be called inside a tokio runtime. Calling it again while running
    /// does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        // One pending signal is enough: later triggers coalesce into it.
        let (signals, inbox) = mpsc::channel(1);
        let handle = tokio::spawn(run(self.shared.clone(), inbox, self.retry_interval));
        *running = Some(Running { signals, handle });
        debug!(retry_interval_ms = self.retry_interval.as_millis() as u64, "sync monitor started");
    }

    /// Stops the background task, letting a cycle in flight finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { signals, handle }) = running {
            drop(signals);
            if let Err(err) = handle.await {
                warn!(error = %err, "sync task ended abnormally");
            }
            debug!("sync monitor stopped");
        }
    }

    /// Asks the background task for a cycle.
    ///
    /// Returns false without doing anything while offline or stopped; the
    /// retry timer owns reconnection. Bursts of triggers coalesce into one
    /// cycle.
    pub fn trigger_sync(&self) -> bool {
        if self.status() == SyncStatus::Offline {
            return false;
        }
        let running = self.running.lock();
        let Some(running) = running.as_ref() else {
            return false;
        };
        match running.signals.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Runs a cycle now, whatever the status, and reports whether it
    /// completed.
    pub async fn sync_now(&self) -> bool {
        self.shared.cycle().await
    }
}

impl<T: SyncTransport + 'static> Drop for SyncMonitor<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

async fn run<T: SyncTransport + 'static>(
    shared: Arc<Shared<T>>,
    mut inbox: mpsc::Receiver<()>,
    retry_interval: Duration,
) {
    shared.cycle().await;

    let first = tokio::time::Instant::now() + retry_interval;
    let mut retry = tokio::time::interval_at(first, retry_interval);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = inbox.recv() => match signal {
                Some(()) => {
                    while inbox.try_recv().is_ok() {}
                    shared.cycle().await;
                }
                None => break,
            },
            _ = retry.tick() => {
                let offline = *shared.status.borrow() == SyncStatus::Offline;
                if offline {
                    debug!("retrying sync while offline");
                    shared.cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::MockTransport;
    use pitwall_core::{Database, StoreConfig};

    fn monitor(retry: Duration) -> (SyncMonitor<Arc<MockTransport>>, Arc<MockTransport>) {
        let db = Arc::new(Database::open_in_memory(StoreConfig::replica()).unwrap());
        let transport = Arc::new(MockTransport::new());
        let engine = SyncEngine::new(
            db,
            transport.clone(),
            SyncConfig::default().with_retry_interval(retry),
        );
        (SyncMonitor::new(Arc::new(engine)), transport)
    }

    async fn wait_for(rx: &mut watch::Receiver<SyncStatus>, want: SyncStatus) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("status never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn starts_offline_and_goes_online() {
        let (monitor, transport) = monitor(Duration::from_secs(60));
        assert_eq!(monitor.status(), SyncStatus::Offline);
        assert!(!monitor.trigger_sync());

        let mut rx = monitor.subscribe();
        monitor.start();
        wait_for(&mut rx, SyncStatus::Online).await;
        assert_eq!(transport.request_count(), 1);

        monitor.stop().await;
        assert!(!monitor.is_running());
        assert!(!monitor.trigger_sync());
    }

    #[tokio::test]
    async fn failure_goes_offline_and_timer_retries() {
        let (monitor, transport) = monitor(Duration::from_millis(30));
        transport.set_offline(true);

        let mut rx = monitor.subscribe();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(transport.request_count() >= 1);
        assert_eq!(monitor.status(), SyncStatus::Offline);
        assert!(!monitor.trigger_sync());

        transport.set_offline(false);
        wait_for(&mut rx, SyncStatus::Online).await;
        assert!(transport.request_count() >= 2);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn triggers_coalesce() {
        let (monitor, transport) = monitor(Duration::from_secs(60));
        let mut rx = monitor.subscribe();
        monitor.start();
        wait_for(&mut rx, SyncStatus::Online).await;

        transport.set_delay(Some(Duration::from_millis(50)));
        for _ in 0..10 {
            assert!(monitor.trigger_sync());
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        monitor.stop().await;

        // The initial cycle plus at most two for the burst.
        let count = transport.request_count();
        assert!((2..=3).contains(&count), "{count} exchanges");
    }

    #[tokio::test]
    async fn skipped_cycle_keeps_status_and_retry_still_fires() {
        let (monitor, transport) = monitor(Duration::from_millis(30));
        transport.set_offline(true);
        transport.set_delay(Some(Duration::from_millis(100)));

        // A cycle started outside the monitor is in flight and will fail.
        let outside = tokio::spawn({
            let engine = monitor.engine().clone();
            async move { engine.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!monitor.sync_now().await);
        assert_eq!(monitor.status(), SyncStatus::Offline);
        assert!(outside.await.unwrap().is_err());
        assert_eq!(monitor.status(), SyncStatus::Offline);

        transport.set_delay(None);
        transport.set_offline(false);
        let mut rx = monitor.subscribe();
        monitor.start();
        wait_for(&mut rx, SyncStatus::Online).await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn sync_now_reports_result() {
        let (monitor, transport) = monitor(Duration::from_secs(60));
        assert!(monitor.sync_now().await);
        assert_eq!(monitor.status(), SyncStatus::Online);

        transport.set_offline(true);
        assert!(!monitor.sync_now().await);
        assert_eq!(monitor.status(), SyncStatus::Offline);
    }
}
