//! # Pitwall Sync Server
//!
//! HTTP server holding the authoritative Pitwall record store.
//!
//! This crate provides:
//! - `POST /sync`, the push-then-pull exchange used by device replicas
//! - The pit-lane endpoints (add, remove, clear line, config, listings)
//! - Error mapping onto HTTP status codes and the `{ success, data, error }`
//!   envelope
//!
//! # Architecture
//!
//! The server uses the same store as the replicas, opened in `Retain` mode so
//! tombstones are kept and forwarded to every device. Each request runs in
//! one store transaction.
//!
//! ```rust,ignore
//! use pitwall_sync_server::{serve, ServerConfig, SyncServer};
//! use std::sync::Arc;
//!
//! let server = Arc::new(SyncServer::open(path, ServerConfig::default())?);
//! serve(server, tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```
//!
//! # Sync timestamps
//!
//! The `serverTimestamp` returned to a client is read from the server clock
//! before the client's changes are applied. Accepted rows are stored no
//! earlier than the server clock inside the merge transaction, so every row
//! a replica has not pulled yet sorts above that replica's checkpoint, no
//! matter how late or how skewed the device that wrote it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod routes;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use routes::{router, serve, Health};
pub use server::SyncServer;
