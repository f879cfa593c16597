//! Transport layer abstraction for sync exchanges.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use pitwall_protocol::{SyncRequest, SyncResponse};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Carries one `POST /sync` exchange to the server.
///
/// This trait abstracts the network layer so the engine can run over HTTP,
/// an in-process server, or a mock.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends the outgoing change-set and returns the server's response.
    async fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        (**self).exchange(request).await
    }
}

/// A scripted transport for testing.
///
/// Queued results are returned in order; once the script runs out, every
/// exchange answers with no changes and echoes the client's checkpoint.
#[derive(Debug, Default)]
pub struct MockTransport {
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    script: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.script.lock().push_back(Err(error));
    }

    /// While offline, every exchange fails with a retryable transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every exchange wait before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Number of exchanges attempted.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.requests.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("mock transport is offline"));
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(SyncResponse::new(
                request.last_sync_timestamp,
                Default::default(),
            ))
        })
    }
}
