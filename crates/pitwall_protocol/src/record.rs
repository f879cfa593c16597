//! Keyed rows with sync fields.

use crate::entity::{Entity, RecordKey};
use crate::timestamp::Timestamp;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle state of a record.
///
/// A tombstone carries no business fields; the deletion time is the only
/// payload that survives.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState<E> {
    /// The row is live.
    Active(E),
    /// The row was soft-deleted.
    Tombstoned {
        /// When the row was deleted.
        deleted_at: Timestamp,
    },
}

/// A row of table `E::TABLE`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<E: Entity> {
    /// Primary key.
    pub key: E::Key,
    /// Time of the last write, used for last-write-wins.
    pub updated_at: Timestamp,
    /// Live body or tombstone.
    pub state: RecordState<E>,
}

impl<E: Entity> Record<E> {
    /// Creates a live record.
    pub fn active(key: E::Key, body: E, updated_at: Timestamp) -> Self {
        Self {
            key,
            updated_at,
            state: RecordState::Active(body),
        }
    }

    /// Creates a tombstone deleted at `at`.
    pub fn tombstone(key: E::Key, at: Timestamp) -> Self {
        Self {
            key,
            updated_at: at,
            state: RecordState::Tombstoned { deleted_at: at },
        }
    }

    /// Returns true while the record has not been deleted.
    pub fn is_live(&self) -> bool {
        matches!(self.state, RecordState::Active(_))
    }

    /// Returns true for a tombstone.
    pub fn is_tombstone(&self) -> bool {
        !self.is_live()
    }

    /// The live body, if any.
    pub fn body(&self) -> Option<&E> {
        match &self.state {
            RecordState::Active(body) => Some(body),
            RecordState::Tombstoned { .. } => None,
        }
    }

    /// Deletion time of a tombstone.
    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self.state {
            RecordState::Active(_) => None,
            RecordState::Tombstoned { deleted_at } => Some(deleted_at),
        }
    }

    /// Replaces the body and stamps the record at `at`.
    pub fn with_body(mut self, body: E, at: Timestamp) -> Self {
        self.state = RecordState::Active(body);
        self.updated_at = at;
        self
    }

    /// Turns the record into a tombstone deleted at `at`.
    pub fn into_tombstone(self, at: Timestamp) -> Self {
        Self::tombstone(self.key, at)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a, W, E> {
    #[serde(flatten)]
    key: W,
    #[serde(flatten)]
    body: Option<&'a E>,
    updated_at: Timestamp,
    is_deleted: bool,
    deleted_at: Option<Timestamp>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn<W, E> {
    #[serde(flatten)]
    key: W,
    #[serde(flatten)]
    body: Option<E>,
    updated_at: Timestamp,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    deleted_at: Option<Timestamp>,
}

impl<E: Entity> Serialize for Record<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireOut {
            key: self.key.to_wire(),
            body: self.body(),
            updated_at: self.updated_at,
            is_deleted: self.is_tombstone(),
            deleted_at: self.deleted_at(),
        }
        .serialize(serializer)
    }
}

impl<'de, E: Entity> Deserialize<'de> for Record<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireIn::<<E::Key as RecordKey>::Wire, E>::deserialize(deserializer)?;
        let key = E::Key::from_wire(wire.key);
        let state = if wire.is_deleted {
            // Business fields on an inbound tombstone are ignored.
            RecordState::Tombstoned {
                deleted_at: wire.deleted_at.unwrap_or(wire.updated_at),
            }
        } else {
            match wire.body {
                Some(body) => RecordState::Active(body),
                None => {
                    return Err(D::Error::custom(format!(
                        "live {} record {} is missing business fields",
                        E::TABLE,
                        key
                    )))
                }
            }
        };
        Ok(Self {
            key,
            updated_at: wire.updated_at,
            state,
        })
    }
}
