//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    /// How often the monitor retries while offline.
    pub retry_interval: Duration,
    /// Upper bound on one request/response exchange.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for `server_url` with default timings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            retry_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the offline retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL of the sync endpoint.
    pub fn sync_url(&self) -> String {
        format!("{}/sync", self.server_url.trim_end_matches('/'))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8080")
    }
}
