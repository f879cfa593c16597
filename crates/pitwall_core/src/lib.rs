//! # Pitwall Core
//!
//! Record store and race-day logic for Pitwall.
//!
//! This crate provides:
//! - A journaled store for the seven record types, used as the server store
//!   and as the device replica
//! - Transactions with undo-log rollback
//! - The pit-lane queue engine and roster writers
//! - The last-write-wins merge of inbound change-sets
//! - Invariant audits

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod audit;
mod clock;
mod config;
mod database;
mod dir;
mod error;
mod ids;
pub mod journal;
pub mod merge;
mod queue;
mod roster;
mod tables;

pub use audit::{audit, Violation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EvictionPolicy, HeadEviction, QueueConfig, StoreConfig, TombstoneMode};
pub use database::{Database, StoreStats, Transaction};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use ids::IdGenerator;
pub use merge::{apply_change_set, apply_received, drop_echoes, MergeReport, SlotWrite};
pub use queue::{line_entries, AddOutcome, QueueEngine};
pub use roster::Roster;
pub use tables::{Row, StoreMeta, StoredEntity, TableCount, Tables};

/// Crate version, reported by `pitwall version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
