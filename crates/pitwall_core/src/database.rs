//! Store facade, transactions and recovery.

use crate::clock::{Clock, SystemClock};
use crate::config::{StoreConfig, TombstoneMode};
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::ids::IdGenerator;
use crate::journal::{decode_ops, encode_ops, FileJournal, Journal, JournalOp, MemoryJournal};
use crate::tables::{Row, StoredEntity, TableCount, Tables};
use parking_lot::{Mutex, RwLock};
use pitwall_protocol::{ChangeSet, Record, RecordState, TableName, Timestamp};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type Undo = Box<dyn FnOnce(&mut Tables)>;

/// The record store.
///
/// `Database` holds the seven tables in memory and journals every committed
/// transaction. It is used both as the server's record store
/// ([`TombstoneMode::Retain`]) and as a device replica
/// ([`TombstoneMode::Purge`]).
///
/// # Opening a Store
///
/// ```rust,ignore
/// use pitwall_core::{Database, StoreConfig};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("replica"), StoreConfig::replica())?;
/// let team = db.transaction(|txn| Ok(txn.create(Team { name: "Blue".into() })))?;
/// ```
///
/// # Writers
///
/// The store is single-writer: [`Database::transaction`] holds the write lock
/// for the duration of the closure. An `Err` from the closure rolls back
/// every change and nothing is journaled.
pub struct Database {
    config: StoreConfig,
    tables: RwLock<Tables>,
    journal: Mutex<Box<dyn Journal>>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    committed: AtomicU64,
    aborted: AtomicU64,
    compactions: AtomicU64,
    _dir: Option<StoreDir>,
}

/// Point-in-time statistics of a store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    /// Transactions committed since open.
    pub transactions_committed: u64,
    /// Transactions rolled back since open.
    pub transactions_aborted: u64,
    /// Journal rewrites since open.
    pub compactions: u64,
    /// Frames currently in the journal.
    pub journal_frames: usize,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Server checkpoint.
    pub last_sync: Timestamp,
    /// Push watermark on the local clock.
    pub pushed_through: Timestamp,
    /// Store identity.
    pub device_id: Uuid,
    /// Row counts per table.
    pub tables: Vec<(TableName, TableCount)>,
}

impl Database {
    /// Opens or creates a store in the directory at `path`.
    ///
    /// # Errors
    ///
    /// - `StoreLocked` if another process has the store open
    /// - `InvalidStore` if the journal is not a pitwall journal
    /// - `JournalCorruption` if an intact frame cannot be decoded
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock::new()))
    }

    /// Opens a directory store with an explicit clock.
    pub fn open_with_clock(
        path: &Path,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let journal = FileJournal::open(&dir.journal_path())?;
        let mut db = Self::open_with(config, Box::new(journal), clock)?;
        db._dir = Some(dir);
        Ok(db)
    }

    /// Opens a store that lives only in memory.
    pub fn open_in_memory(config: StoreConfig) -> CoreResult<Self> {
        Self::open_with(
            config,
            Box::new(MemoryJournal::new()),
            Arc::new(SystemClock::new()),
        )
    }

    /// Opens a store over any journal, replaying what it holds.
    pub fn open_with(
        config: StoreConfig,
        mut journal: Box<dyn Journal>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let mut tables = Tables::default();
        for (frame, payload) in journal.load()?.into_iter().enumerate() {
            let ops = decode_ops(&payload).map_err(|e| CoreError::JournalCorruption {
                frame,
                message: e.to_string(),
            })?;
            for op in ops {
                op.apply(&mut tables);
            }
        }

        if tables.meta.device_id.is_nil() {
            let device = Uuid::new_v4();
            journal.append(&encode_ops(&[JournalOp::Device(device)])?)?;
            journal.sync()?;
            tables.meta.device_id = device;
        }

        tracing::debug!(
            device = %tables.meta.device_id,
            last_sync = %tables.meta.last_sync,
            frames = journal.frame_count(),
            "store opened"
        );

        let ids = IdGenerator::resume(tables.meta.device_id, tables.max_numeric_id());
        Ok(Self {
            config,
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
            clock,
            ids,
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            _dir: None,
        })
    }

    /// Runs `f` as one atomic transaction.
    ///
    /// If `f` returns `Ok`, its changes are journaled and kept. If it returns
    /// `Err`, or the journal write fails, every change is undone.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut tables = self.tables.write();
        let mut txn = Transaction {
            tables: &mut tables,
            clock: self.clock.as_ref(),
            ids: &self.ids,
            mode: self.config.tombstones,
            ops: Vec::new(),
            undo: Vec::new(),
        };
        let result = f(&mut txn);
        let Transaction { ops, undo, .. } = txn;

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                rollback(&mut tables, undo);
                self.aborted.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        if ops.is_empty() {
            return Ok(value);
        }

        let mut journal = self.journal.lock();
        if let Err(err) = self.append(journal.as_mut(), &ops) {
            tracing::error!(error = %err, "journal append failed, rolling back");
            rollback(&mut tables, undo);
            self.aborted.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        self.committed.fetch_add(1, Ordering::Relaxed);

        let threshold = self.config.compact_after_frames;
        if threshold > 0 && journal.frame_count() >= threshold {
            if let Err(err) = self.rewrite(journal.as_mut(), &tables) {
                tracing::warn!(error = %err, "automatic compaction failed");
            }
        }
        Ok(value)
    }

    fn append(&self, journal: &mut dyn Journal, ops: &[JournalOp]) -> CoreResult<()> {
        journal.append(&encode_ops(ops)?)?;
        if self.config.sync_on_commit {
            journal.sync()?;
        }
        Ok(())
    }

    fn rewrite(&self, journal: &mut dyn Journal, tables: &Tables) -> CoreResult<()> {
        let before = journal.size_bytes();
        let snapshot = encode_ops(&tables.snapshot_ops())?;
        journal.rewrite(&[snapshot])?;
        self.compactions.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            before_bytes = before,
            after_bytes = journal.size_bytes(),
            "journal compacted"
        );
        Ok(())
    }

    /// Rewrites the journal as a single snapshot frame.
    pub fn compact(&self) -> CoreResult<()> {
        let tables = self.tables.read();
        let mut journal = self.journal.lock();
        self.rewrite(journal.as_mut(), &tables)
    }

    /// Runs `f` against a consistent view of the tables.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }

    /// Returns a copy of the row stored under `key`, tombstones included.
    pub fn get<E: StoredEntity>(&self, key: &E::Key) -> Option<Record<E>> {
        self.tables.read().get::<E>(key).cloned()
    }

    /// Returns a copy of every row of `E`, tombstones included.
    pub fn scan<E: StoredEntity>(&self) -> Vec<Record<E>> {
        self.tables.read().scan::<E>().cloned().collect()
    }

    /// Rows written after `since` across all seven tables.
    pub fn changes_since(&self, since: Timestamp) -> ChangeSet {
        self.tables.read().changes_since(since)
    }

    /// The server checkpoint this store has fully ingested.
    pub fn checkpoint(&self) -> Timestamp {
        self.tables.read().meta().last_sync
    }

    /// Local clock reading up to which rows have been pushed.
    pub fn pushed_through(&self) -> Timestamp {
        self.tables.read().meta().pushed_through
    }

    /// The store identity.
    pub fn device_id(&self) -> Uuid {
        self.tables.read().meta().device_id
    }

    /// Reads the store clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The store clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current statistics.
    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        let journal = self.journal.lock();
        StoreStats {
            transactions_committed: self.committed.load(Ordering::Relaxed),
            transactions_aborted: self.aborted.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            journal_frames: journal.frame_count(),
            journal_bytes: journal.size_bytes(),
            last_sync: tables.meta().last_sync,
            pushed_through: tables.meta().pushed_through,
            device_id: tables.meta().device_id,
            tables: tables.counts(),
        }
    }
}

fn rollback(tables: &mut Tables, undo: Vec<Undo>) {
    for step in undo.into_iter().rev() {
        step(tables);
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("tombstones", &self.config.tombstones)
            .field("checkpoint", &self.checkpoint())
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An open write transaction.
///
/// Dereferences to [`Tables`], so reads inside the transaction see its own
/// writes.
pub struct Transaction<'a> {
    tables: &'a mut Tables,
    clock: &'a dyn Clock,
    ids: &'a IdGenerator,
    mode: TombstoneMode,
    ops: Vec<JournalOp>,
    undo: Vec<Undo>,
}

impl Deref for Transaction<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl Transaction<'_> {
    /// Reads the store clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Allocates a fresh numeric id.
    pub fn next_id<K: From<i64>>(&self) -> K {
        K::from(self.ids.next(self.clock.now()))
    }

    /// How this store treats tombstones arriving through merge.
    pub fn tombstone_mode(&self) -> TombstoneMode {
        self.mode
    }

    /// Stores `record` as is, replacing any row with the same key.
    pub fn put<E: StoredEntity>(&mut self, record: Record<E>) {
        self.put_row(Row::local(record));
    }

    /// Stores `record` with an explicit receipt stamp.
    ///
    /// `received_at` only decides which deltas carry the row; the record's
    /// own `updated_at` is kept for last-write-wins.
    pub fn put_received<E: StoredEntity>(&mut self, record: Record<E>, received_at: Timestamp) {
        self.put_row(Row {
            record,
            received_at,
        });
    }

    fn put_row<E: StoredEntity>(&mut self, row: Row<E>) {
        let key = row.record.key;
        let previous = E::table_mut(self.tables).insert(key, row.clone());
        self.ops.push(E::put_op(row));
        self.undo.push(Box::new(move |tables: &mut Tables| {
            let table = E::table_mut(tables);
            match previous {
                Some(previous) => {
                    table.insert(key, previous);
                }
                None => {
                    table.remove(&key);
                }
            }
        }));
    }

    /// Physically removes the row under `key`.
    pub fn purge<E: StoredEntity>(&mut self, key: E::Key) -> Option<Record<E>> {
        let removed = E::table_mut(self.tables).remove(&key)?;
        self.ops.push(E::purge_op(key));
        let record = removed.record.clone();
        self.undo.push(Box::new(move |tables: &mut Tables| {
            E::table_mut(tables).insert(key, removed);
        }));
        Some(record)
    }

    /// Creates a live row under a freshly allocated id, stamped now.
    pub fn create<E: StoredEntity>(&mut self, body: E) -> Record<E>
    where
        E::Key: From<i64>,
    {
        let key = self.next_id::<E::Key>();
        self.write(key, body)
    }

    /// Timestamp for a local write to `key`.
    ///
    /// Normally the clock reading. A stored row stamped at or after it (a
    /// merged row from a clock running ahead) pushes the write one
    /// millisecond past that row, so a local edit always supersedes the
    /// version it was made against.
    fn stamp_over<E: StoredEntity>(&self, key: &E::Key) -> Timestamp {
        let now = self.now();
        match self.tables.get::<E>(key) {
            Some(existing) if existing.updated_at >= now => {
                Timestamp::from_millis(existing.updated_at.as_millis() + 1)
            }
            _ => now,
        }
    }

    /// Writes a live row under `key`, stamped now.
    pub fn write<E: StoredEntity>(&mut self, key: E::Key, body: E) -> Record<E> {
        let at = self.stamp_over::<E>(&key);
        let record = Record::active(key, body, at);
        self.put(record.clone());
        record
    }

    /// Soft-deletes the live row under `key`, stamped now.
    ///
    /// Returns the body the row held, or `None` if there was no live row.
    /// Local deletions are always stored as tombstones so they can be pushed.
    pub fn tombstone<E: StoredEntity>(&mut self, key: E::Key) -> Option<E> {
        let body = match self.tables.get::<E>(&key)?.state.clone() {
            RecordState::Active(body) => body,
            RecordState::Tombstoned { .. } => return None,
        };
        let at = self.stamp_over::<E>(&key);
        self.put(Record::<E>::tombstone(key, at));
        Some(body)
    }

    /// Advances the sync checkpoint.
    pub fn set_checkpoint(&mut self, at: Timestamp) {
        let previous = self.tables.meta.last_sync;
        self.tables.meta.last_sync = at;
        self.ops.push(JournalOp::Checkpoint(at));
        self.undo.push(Box::new(move |tables: &mut Tables| {
            tables.meta.last_sync = previous;
        }));
    }

    /// Advances the push watermark.
    pub fn set_pushed_through(&mut self, at: Timestamp) {
        let previous = self.tables.meta.pushed_through;
        self.tables.meta.pushed_through = at;
        self.ops.push(JournalOp::Pushed(at));
        self.undo.push(Box::new(move |tables: &mut Tables| {
            tables.meta.pushed_through = previous;
        }));
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}
