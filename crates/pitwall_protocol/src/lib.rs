//! # Pitwall Protocol
//!
//! Record shapes and wire messages shared by the Pitwall replica, server and
//! sync engine.
//!
//! This crate provides:
//! - The seven entity bodies (`Team`, `Race`, `RaceTeam`, `Kart`,
//!   `PitlaneConfig`, `PitlaneCurrent`, `PitlaneHistory`) and their typed keys
//! - `Record<E>`, a keyed row carrying sync fields and a tagged
//!   `Active | Tombstoned` state
//! - `ChangeSet`, the seven-table delta exchanged by `POST /sync`
//! - Request/response messages for the sync and pit-lane endpoints
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Wire format
//!
//! Records are JSON objects in camelCase with the sync fields flattened in:
//!
//! ```json
//! { "id": 7, "raceId": 3, "status": 1, "teamId": null,
//!   "updatedAt": 1700000000000, "isDeleted": false, "deletedAt": null }
//! ```
//!
//! A tombstone is emitted with its key and sync fields only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_set;
mod entity;
mod error;
mod messages;
mod record;
mod timestamp;

pub use change_set::ChangeSet;
pub use entity::{
    Entity, Kart, KartId, PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId,
    PitlaneHistory, PitlaneHistoryId, Race, RaceId, RaceTeam, RaceTeamKey, RecordKey, TableName,
    Team, TeamId,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    AddKartRequest, ApiResponse, ClearLineQuery, ClearLineResult, CreateConfigRequest,
    RemoveKartRequest, SyncRequest, SyncResponse,
};
pub use record::{Record, RecordState};
pub use timestamp::Timestamp;
