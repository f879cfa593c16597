//! HTTP routes.
//!
//! | Method | Path                                          | Body / query              |
//! |--------|-----------------------------------------------|---------------------------|
//! | POST   | `/sync`                                       | `SyncRequest`             |
//! | POST   | `/pitlanes`                                   | `CreateConfigRequest`     |
//! | POST   | `/pitlanes/current/add`                       | `AddKartRequest`          |
//! | DELETE | `/pitlanes/current/line?configId&lineNumber`  |                           |
//! | DELETE | `/pitlanes/current/:id`                       | optional `{ teamId }`     |
//! | GET    | `/pitlanes/:config_id/current`                |                           |
//! | GET    | `/pitlanes/:config_id/history`                |                           |
//! | GET    | `/health`                                     |                           |

use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use pitwall_core::StoreStats;
use pitwall_protocol::{
    AddKartRequest, ApiResponse, ClearLineQuery, ClearLineResult, CreateConfigRequest,
    PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId, PitlaneHistory, Record,
    RemoveKartRequest, SyncRequest, SyncResponse, Timestamp,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

type AppState = Arc<SyncServer>;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Always `"ok"` when the server answers.
    pub status: &'static str,
    /// Current server clock.
    pub server_timestamp: Timestamp,
    /// Store counters.
    pub store: StoreStats,
}

/// Builds the router for `server`.
pub fn router(server: Arc<SyncServer>) -> Router {
    let config = server.config().clone();
    let routes = Router::new()
        .route("/sync", post(sync))
        .route("/pitlanes", post(create_config))
        .route("/pitlanes/current/add", post(add_kart))
        .route("/pitlanes/current/line", delete(clear_line))
        .route("/pitlanes/current/:id", delete(remove_kart))
        .route("/pitlanes/:config_id/current", get(current))
        .route("/pitlanes/:config_id/history", get(history))
        .route("/health", get(health))
        .with_state(server);

    let routes = routes.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(config.request_timeout)),
    );

    if config.enable_cors {
        routes.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        routes
    }
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(server: Arc<SyncServer>, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    info!(addr = %listener.local_addr()?, "pitwall server listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("pitwall server stopped");
    Ok(())
}

/// Runs a store call on the blocking pool; store locks are synchronous.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

async fn sync(
    State(server): State<AppState>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> ServerResult<Json<SyncResponse>> {
    let Json(request) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let response = blocking(move || server.handle_sync(request)).await?;
    Ok(Json(response))
}

async fn create_config(
    State(server): State<AppState>,
    payload: Result<Json<CreateConfigRequest>, JsonRejection>,
) -> ServerResult<(StatusCode, Json<ApiResponse<Record<PitlaneConfig>>>)> {
    let Json(request) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let config = blocking(move || server.create_config(&request)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(config))))
}

async fn add_kart(
    State(server): State<AppState>,
    payload: Result<Json<AddKartRequest>, JsonRejection>,
) -> ServerResult<(StatusCode, Json<ApiResponse<Record<PitlaneCurrent>>>)> {
    let Json(request) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let entry = blocking(move || server.add_kart(&request)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(entry))))
}

async fn remove_kart(
    State(server): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ServerResult<Json<ApiResponse<Record<PitlaneHistory>>>> {
    // The body is optional; an empty one means no team takes the kart.
    let request = if body.is_empty() {
        RemoveKartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::InvalidRequest(format!("invalid body: {e}")))?
    };
    let history = blocking(move || server.remove_kart(PitlaneEntryId(id), &request)).await?;
    Ok(Json(ApiResponse::ok(history)))
}

async fn clear_line(
    State(server): State<AppState>,
    query: Result<Query<ClearLineQuery>, QueryRejection>,
) -> ServerResult<Json<ApiResponse<ClearLineResult>>> {
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let result = blocking(move || server.clear_line(query.config_id, query.line_number)).await?;
    Ok(Json(ApiResponse::ok(result)))
}

async fn current(
    State(server): State<AppState>,
    Path(config_id): Path<i64>,
) -> ServerResult<Json<ApiResponse<Vec<Record<PitlaneCurrent>>>>> {
    let entries = blocking(move || server.current(PitlaneConfigId(config_id))).await?;
    Ok(Json(ApiResponse::ok(entries)))
}

async fn history(
    State(server): State<AppState>,
    Path(config_id): Path<i64>,
) -> ServerResult<Json<ApiResponse<Vec<Record<PitlaneHistory>>>>> {
    let exits = blocking(move || server.history(PitlaneConfigId(config_id))).await?;
    Ok(Json(ApiResponse::ok(exits)))
}

async fn health(State(server): State<AppState>) -> Json<Health> {
    let db = server.database();
    Json(Health {
        status: "ok",
        server_timestamp: db.now(),
        store: db.stats(),
    })
}
