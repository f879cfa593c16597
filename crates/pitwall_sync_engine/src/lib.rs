//! # Pitwall Sync Engine
//!
//! Keeps a device replica in step with the Pitwall server.
//!
//! This crate provides:
//! - The push-then-pull sync cycle with a persisted checkpoint
//! - A transport abstraction with HTTP and mock implementations
//! - The sync status monitor (`Offline → Syncing → Online`) and its
//!   background task
//! - Local-first pit-lane writes that request a sync after committing
//!
//! ## Cycle
//!
//! 1. Read the checkpoint `T` and gather local rows written after it
//! 2. `POST /sync` with `{ lastSyncTimestamp: T, changes }`
//! 3. Merge the server's changes and store `serverTimestamp` as the new
//!    checkpoint, in one store transaction
//!
//! Any failure leaves the checkpoint alone, so the next cycle resends the
//! same delta.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod local;
mod monitor;
mod transport;

pub use config::SyncConfig;
pub use engine::{CycleReport, SyncEngine, SyncOutcome, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::HttpTransport;
pub use local::LocalPitlane;
pub use monitor::{SyncMonitor, SyncStatus};
pub use transport::{MockTransport, SyncTransport};
