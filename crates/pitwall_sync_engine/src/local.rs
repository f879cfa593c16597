//! Local-first pit-lane writes.

use crate::monitor::SyncMonitor;
use crate::transport::SyncTransport;
use pitwall_core::{AddOutcome, CoreResult, QueueEngine};
use pitwall_protocol::{KartId, PitlaneConfigId, PitlaneEntryId, PitlaneHistory, Record, TeamId};
use std::sync::Arc;
use tracing::debug;

/// Queue operations on the replica, each followed by a sync request.
///
/// The write commits locally first. Whether the trigger is accepted never
/// changes the result of the write.
pub struct LocalPitlane<T: SyncTransport + 'static> {
    queue: QueueEngine,
    monitor: Arc<SyncMonitor<T>>,
}

impl<T: SyncTransport + 'static> LocalPitlane<T> {
    /// Wraps the replica's queue engine.
    pub fn new(queue: QueueEngine, monitor: Arc<SyncMonitor<T>>) -> Self {
        Self { queue, monitor }
    }

    /// The local queue engine, for reads.
    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    /// The monitor notified after each write.
    pub fn monitor(&self) -> &Arc<SyncMonitor<T>> {
        &self.monitor
    }

    /// See [`QueueEngine::add_kart`].
    pub fn add_kart(
        &self,
        config_id: PitlaneConfigId,
        team_id: TeamId,
        kart_id: KartId,
        line_number: u32,
    ) -> CoreResult<AddOutcome> {
        let outcome = self.queue.add_kart(config_id, team_id, kart_id, line_number)?;
        self.after_write();
        Ok(outcome)
    }

    /// See [`QueueEngine::add_team_kart`].
    pub fn add_team_kart(
        &self,
        config_id: PitlaneConfigId,
        team_id: TeamId,
        line_number: u32,
    ) -> CoreResult<AddOutcome> {
        let outcome = self.queue.add_team_kart(config_id, team_id, line_number)?;
        self.after_write();
        Ok(outcome)
    }

    /// See [`QueueEngine::remove_kart`].
    pub fn remove_kart(
        &self,
        entry_id: PitlaneEntryId,
        assign_to: Option<TeamId>,
    ) -> CoreResult<Record<PitlaneHistory>> {
        let history = self.queue.remove_kart(entry_id, assign_to)?;
        self.after_write();
        Ok(history)
    }

    /// See [`QueueEngine::clear_line`].
    pub fn clear_line(&self, config_id: PitlaneConfigId, line_number: u32) -> CoreResult<usize> {
        let cleared = self.queue.clear_line(config_id, line_number)?;
        self.after_write();
        Ok(cleared)
    }

    fn after_write(&self) {
        let accepted = self.monitor.trigger_sync();
        debug!(accepted, status = %self.monitor.status(), "sync requested after local write");
    }
}
