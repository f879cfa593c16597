//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use pitwall_core::{apply_received, drop_echoes, Database, QueueEngine};
use pitwall_protocol::{
    AddKartRequest, ClearLineResult, CreateConfigRequest, PitlaneConfig, PitlaneConfigId,
    PitlaneCurrent, PitlaneEntryId, PitlaneHistory, Record, RemoveKartRequest, SyncRequest,
    SyncResponse,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// The sync server.
///
/// Owns the authoritative store and answers sync exchanges and pit-lane
/// calls against it. The HTTP layer in [`crate::router`] is a thin adapter
/// over these methods, so tests and in-process transports can call them
/// directly.
///
/// # Example
///
/// ```
/// use pitwall_sync_server::{ServerConfig, SyncServer};
/// use pitwall_protocol::SyncRequest;
///
/// let server = SyncServer::in_memory(ServerConfig::default()).unwrap();
/// let response = server.handle_sync(SyncRequest::default()).unwrap();
/// assert!(response.changes.is_empty());
/// ```
pub struct SyncServer {
    db: Arc<Database>,
    queue: QueueEngine,
    config: ServerConfig,
}

impl SyncServer {
    /// Creates a server over an open store.
    pub fn new(db: Arc<Database>, config: ServerConfig) -> Self {
        let queue = QueueEngine::new(db.clone(), config.queue);
        Self { db, queue, config }
    }

    /// Opens the store at `path` and creates a server over it.
    pub fn open(path: &Path, config: ServerConfig) -> ServerResult<Self> {
        let db = Database::open(path, config.store.clone())?;
        Ok(Self::new(Arc::new(db), config))
    }

    /// Creates a server over a fresh in-memory store.
    pub fn in_memory(config: ServerConfig) -> ServerResult<Self> {
        let db = Database::open_in_memory(config.store.clone())?;
        Ok(Self::new(Arc::new(db), config))
    }

    /// The record store.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The pit-lane queue engine.
    pub fn queue(&self) -> &QueueEngine {
        &self.queue
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles one sync exchange.
    ///
    /// In one store transaction: reads the server clock, applies the client's
    /// changes as received at that reading (see
    /// [`pitwall_core::apply_received`]), then collects every row received
    /// after the client's checkpoint except the client's own rows. The clock
    /// reading becomes the client's next checkpoint.
    pub fn handle_sync(&self, request: SyncRequest) -> ServerResult<SyncResponse> {
        let start = Instant::now();
        let (server_timestamp, report, changes, echoes) = self.db.transaction(|txn| {
            let server_timestamp = txn.now();
            let report = apply_received(txn, &request.changes, server_timestamp)?;
            let mut changes = txn.changes_since(request.last_sync_timestamp);
            let echoes = drop_echoes(&mut changes, &request.changes);
            Ok((server_timestamp, report, changes, echoes))
        })?;

        info!(
            since = %request.last_sync_timestamp,
            received = request.changes.len(),
            applied = report.applied(),
            stale = report.stale,
            orphaned = report.orphaned,
            slots_released = report.slots_released,
            sent = changes.len(),
            echoes,
            server_timestamp = %server_timestamp,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sync exchange handled"
        );
        Ok(SyncResponse::new(server_timestamp, changes))
    }

    /// Queues a kart and returns the new entry.
    pub fn add_kart(&self, request: &AddKartRequest) -> ServerResult<Record<PitlaneCurrent>> {
        let outcome = self.queue.add_kart(
            request.pitlane_config_id,
            request.team_id,
            request.kart_id,
            request.line_number,
        )?;
        Ok(outcome.entry)
    }

    /// Takes an entry out of the pit lane.
    pub fn remove_kart(
        &self,
        entry_id: PitlaneEntryId,
        request: &RemoveKartRequest,
    ) -> ServerResult<Record<PitlaneHistory>> {
        Ok(self.queue.remove_kart(entry_id, request.team_id)?)
    }

    /// Empties a line.
    pub fn clear_line(
        &self,
        config_id: PitlaneConfigId,
        line_number: u32,
    ) -> ServerResult<ClearLineResult> {
        let cleared = self.queue.clear_line(config_id, line_number)?;
        Ok(ClearLineResult { cleared })
    }

    /// Creates the pit-lane configuration of a race.
    pub fn create_config(
        &self,
        request: &CreateConfigRequest,
    ) -> ServerResult<Record<PitlaneConfig>> {
        Ok(self
            .queue
            .create_config(request.race_id, request.lines_count, request.queue_size)?)
    }

    /// Live entries of a configuration, by line then position.
    pub fn current(&self, config_id: PitlaneConfigId) -> ServerResult<Vec<Record<PitlaneCurrent>>> {
        self.queue.config(config_id)?;
        Ok(self.queue.current_by_config(config_id))
    }

    /// Exits recorded for a configuration, most recent first.
    pub fn history(&self, config_id: PitlaneConfigId) -> ServerResult<Vec<Record<PitlaneHistory>>> {
        self.queue.config(config_id)?;
        Ok(self.queue.history_by_config(config_id))
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("request task failed: {err}"))
    }
}
