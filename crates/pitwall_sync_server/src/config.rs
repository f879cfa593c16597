//! Server configuration.

use pitwall_core::{QueueConfig, StoreConfig};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Whether to answer cross-origin requests.
    pub enable_cors: bool,
    /// How the record store is opened.
    pub store: StoreConfig,
    /// Queue behaviour for the pit-lane endpoints.
    pub queue: QueueConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            request_timeout: Duration::from_secs(30),
            enable_cors: true,
            store: StoreConfig::server(),
            queue: QueueConfig::default(),
        }
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enables or disables CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Sets the store configuration.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the queue configuration.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::{HeadEviction, TombstoneMode};

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.store.tombstones, TombstoneMode::Retain);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_request_timeout(Duration::from_secs(5))
            .with_cors(false)
            .with_queue(QueueConfig::new().with_head_eviction(HeadEviction::WhenFull));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(!config.enable_cors);
        assert_eq!(config.queue.head_eviction, HeadEviction::WhenFull);
    }
}
