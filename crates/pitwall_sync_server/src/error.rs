//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pitwall_core::CoreError;
use pitwall_protocol::ApiResponse;
use thiserror::Error;
use tracing::{debug, error};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Store or domain error.
    #[error(transparent)]
    Store(#[from] CoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Store(err) => match err {
                CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::Conflict { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Internal(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(ApiResponse::<()>::err(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_protocol::TableName;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn store_errors_map_to_status() {
        let status = |e: CoreError| ServerError::from(e).status_code();
        assert_eq!(status(CoreError::validation("line")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(CoreError::not_found(TableName::Karts, "kart not found")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(CoreError::conflict("kart is already in pitlane")), StatusCode::CONFLICT);
        assert_eq!(status(CoreError::StoreLocked), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_message_is_passed_through() {
        let err = ServerError::from(CoreError::not_found(TableName::Karts, "kart not found"));
        assert_eq!(err.to_string(), "kart not found");
    }
}
