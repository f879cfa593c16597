//! HTTP transport implementation.
//!
//! Posts the request as JSON to `{server_url}/sync`. Any non-2xx answer ends
//! the cycle as [`SyncError::Server`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use pitwall_protocol::{SyncRequest, SyncResponse};

/// HTTP-based sync transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Creates a transport for the server in `config`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: config.sync_url(),
        })
    }

    /// The sync endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn exchange(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SyncResponse>()
            .await
            .map_err(|e| SyncError::Protocol(format!("failed to decode sync response: {e}")))
    }
}

fn classify(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_builder() {
        SyncError::transport_fatal(err.to_string())
    } else {
        SyncError::transport_retryable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn url_comes_from_config() {
        let transport = HttpTransport::new(&SyncConfig::new("http://10.0.0.2:9000/")).unwrap();
        assert_eq!(transport.url(), "http://10.0.0.2:9000/sync");
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new(&SyncConfig::new(format!("http://127.0.0.1:{port}"))).unwrap();

        let err = transport.exchange(&SyncRequest::default()).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
        assert!(err.is_transport());
    }
}
