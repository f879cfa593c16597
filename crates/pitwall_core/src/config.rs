//! Store and queue configuration.

/// What a store does with tombstones that win a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TombstoneMode {
    /// Keep the tombstone row. Server stores never physically remove rows.
    #[default]
    Retain,
    /// Drop the row. Device replicas forget rows once deletion is observed.
    Purge,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Tombstone handling during merge.
    pub tombstones: TombstoneMode,
    /// Whether to fsync the journal on every commit.
    pub sync_on_commit: bool,
    /// Rewrite the journal as a snapshot once it holds this many frames
    /// (0 = never).
    pub compact_after_frames: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tombstones: TombstoneMode::Retain,
            sync_on_commit: true,
            compact_after_frames: 4096,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a server record store.
    #[must_use]
    pub fn server() -> Self {
        Self::default()
    }

    /// Configuration for a device replica.
    #[must_use]
    pub fn replica() -> Self {
        Self::default().with_tombstones(TombstoneMode::Purge)
    }

    /// Sets the tombstone mode.
    #[must_use]
    pub const fn with_tombstones(mut self, mode: TombstoneMode) -> Self {
        self.tombstones = mode;
        self
    }

    /// Sets whether commits are synced to disk.
    #[must_use]
    pub const fn with_sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn with_compact_after_frames(mut self, frames: usize) -> Self {
        self.compact_after_frames = frames;
        self
    }
}

/// When the head of a non-empty line leaves to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadEviction {
    /// Every arrival pushes the head out, full or not.
    #[default]
    OnArrival,
    /// The head leaves only when the line is at capacity.
    WhenFull,
}

/// Who drives an evicted kart away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// The team that just queued its kart takes the evicted one.
    #[default]
    AssignToArrivingTeam,
    /// The evicted kart goes back to the team that queued it.
    ReturnToOwnTeam,
}

/// Queue engine behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueConfig {
    /// Head eviction rule.
    pub head_eviction: HeadEviction,
    /// Team assignment for evicted karts.
    pub eviction_policy: EvictionPolicy,
}

impl QueueConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the head eviction rule.
    #[must_use]
    pub const fn with_head_eviction(mut self, rule: HeadEviction) -> Self {
        self.head_eviction = rule;
        self
    }

    /// Sets the eviction policy.
    #[must_use]
    pub const fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}
