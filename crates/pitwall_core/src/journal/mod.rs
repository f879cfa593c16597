//! Append-only journal of committed transactions.
//!
//! ```text
//! journal.log
//! ├─ magic "PWJ\x01"
//! ├─ frame: [len: u32 LE][crc32: u32 LE][payload: len bytes]
//! ├─ frame ...
//! ```
//!
//! Each payload is a CBOR list of [`JournalOp`]s written by one committed
//! transaction. Replay applies frames in order. A frame that is cut short or
//! fails its checksum marks the end of the usable journal; everything from
//! that offset on is discarded.

mod file;
mod memory;

pub use file::FileJournal;
pub use memory::MemoryJournal;

use crate::error::{CoreError, CoreResult};
use crate::tables::{Row, StoredEntity, Tables};
use pitwall_protocol::{
    Kart, KartId, PitlaneConfig, PitlaneConfigId, PitlaneCurrent, PitlaneEntryId, PitlaneHistory,
    PitlaneHistoryId, Race, RaceId, RaceTeam, RaceTeamKey, Record, Team, TeamId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Magic bytes at the start of every journal.
pub const JOURNAL_MAGIC: [u8; 4] = *b"PWJ\x01";

const FRAME_HEADER_LEN: usize = 8;

/// A single change inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Write a team row with its receipt stamp.
    Team(Record<Team>, Timestamp),
    /// Write a race row with its receipt stamp.
    Race(Record<Race>, Timestamp),
    /// Write a membership row with its receipt stamp.
    RaceTeam(Record<RaceTeam>, Timestamp),
    /// Write a kart row with its receipt stamp.
    Kart(Record<Kart>, Timestamp),
    /// Write a configuration row with its receipt stamp.
    PitlaneConfig(Record<PitlaneConfig>, Timestamp),
    /// Write a queue entry with its receipt stamp.
    PitlaneCurrent(Record<PitlaneCurrent>, Timestamp),
    /// Write a history row with its receipt stamp.
    PitlaneHistory(Record<PitlaneHistory>, Timestamp),
    /// Remove a team row.
    PurgeTeam(TeamId),
    /// Remove a race row.
    PurgeRace(RaceId),
    /// Remove a membership row.
    PurgeRaceTeam(RaceTeamKey),
    /// Remove a kart row.
    PurgeKart(KartId),
    /// Remove a configuration row.
    PurgePitlaneConfig(PitlaneConfigId),
    /// Remove a queue entry.
    PurgePitlaneCurrent(PitlaneEntryId),
    /// Remove a history row.
    PurgePitlaneHistory(PitlaneHistoryId),
    /// Advance the sync checkpoint.
    Checkpoint(Timestamp),
    /// Advance the push watermark.
    Pushed(Timestamp),
    /// Record the store identity.
    Device(Uuid),
}

impl JournalOp {
    /// Applies the operation to an in-memory image.
    pub(crate) fn apply(self, tables: &mut Tables) {
        fn put<E: StoredEntity>(tables: &mut Tables, record: Record<E>, received_at: Timestamp) {
            E::table_mut(tables).insert(
                record.key,
                Row {
                    record,
                    received_at,
                },
            );
        }
        fn purge<E: StoredEntity>(tables: &mut Tables, key: E::Key) {
            E::table_mut(tables).remove(&key);
        }
        match self {
            JournalOp::Team(r, at) => put(tables, r, at),
            JournalOp::Race(r, at) => put(tables, r, at),
            JournalOp::RaceTeam(r, at) => put(tables, r, at),
            JournalOp::Kart(r, at) => put(tables, r, at),
            JournalOp::PitlaneConfig(r, at) => put(tables, r, at),
            JournalOp::PitlaneCurrent(r, at) => put(tables, r, at),
            JournalOp::PitlaneHistory(r, at) => put(tables, r, at),
            JournalOp::PurgeTeam(k) => purge::<Team>(tables, k),
            JournalOp::PurgeRace(k) => purge::<Race>(tables, k),
            JournalOp::PurgeRaceTeam(k) => purge::<RaceTeam>(tables, k),
            JournalOp::PurgeKart(k) => purge::<Kart>(tables, k),
            JournalOp::PurgePitlaneConfig(k) => purge::<PitlaneConfig>(tables, k),
            JournalOp::PurgePitlaneCurrent(k) => purge::<PitlaneCurrent>(tables, k),
            JournalOp::PurgePitlaneHistory(k) => purge::<PitlaneHistory>(tables, k),
            JournalOp::Checkpoint(ts) => tables.meta.last_sync = ts,
            JournalOp::Pushed(ts) => tables.meta.pushed_through = ts,
            JournalOp::Device(id) => tables.meta.device_id = id,
        }
    }
}

/// Durable sink for committed transactions.
pub trait Journal: Send + fmt::Debug {
    /// Reads every intact frame payload, dropping a damaged tail.
    fn load(&mut self) -> CoreResult<Vec<Vec<u8>>>;

    /// Appends one frame.
    fn append(&mut self, payload: &[u8]) -> CoreResult<()>;

    /// Makes appended frames durable.
    fn sync(&mut self) -> CoreResult<()>;

    /// Atomically replaces the journal with `payloads`.
    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> CoreResult<()>;

    /// Number of frames in the journal.
    fn frame_count(&self) -> usize;

    /// Size of the journal in bytes.
    fn size_bytes(&self) -> u64;
}

/// Encodes a transaction's operations as a frame payload.
pub fn encode_ops(ops: &[JournalOp]) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(ops, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a frame payload.
pub fn decode_ops(payload: &[u8]) -> CoreResult<Vec<JournalOp>> {
    ciborium::de::from_reader(payload).map_err(|e| CoreError::codec(e.to_string()))
}

/// Wraps a payload in a frame header.
pub fn encode_frame(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::codec(format!("frame of {} bytes is too large", payload.len())))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Result of scanning a journal image.
#[derive(Debug, Default)]
pub struct FrameScan {
    /// Payloads of the intact frames.
    pub payloads: Vec<Vec<u8>>,
    /// Length of the intact prefix, header included.
    pub valid_len: u64,
    /// Why scanning stopped early, if it did.
    pub damage: Option<String>,
}

/// Splits a journal image into frame payloads.
///
/// An empty image is a fresh journal. Anything else must start with
/// [`JOURNAL_MAGIC`].
pub fn scan_frames(bytes: &[u8]) -> CoreResult<FrameScan> {
    if bytes.is_empty() {
        return Ok(FrameScan::default());
    }
    if bytes.len() < JOURNAL_MAGIC.len() || bytes[..JOURNAL_MAGIC.len()] != JOURNAL_MAGIC {
        return Err(CoreError::invalid_store("not a pitwall journal"));
    }

    let mut scan = FrameScan {
        valid_len: JOURNAL_MAGIC.len() as u64,
        ..FrameScan::default()
    };
    let mut offset = JOURNAL_MAGIC.len();
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < FRAME_HEADER_LEN {
            scan.damage = Some(format!("truncated frame header at offset {offset}"));
            break;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let expected = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let Some(payload) = rest.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len) else {
            scan.damage = Some(format!("truncated frame payload at offset {offset}"));
            break;
        };
        let actual = compute_crc32(payload);
        if actual != expected {
            scan.damage = Some(format!(
                "checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}"
            ));
            break;
        }
        scan.payloads.push(payload.to_vec());
        offset += FRAME_HEADER_LEN + len;
        scan.valid_len = offset as u64;
    }
    Ok(scan)
}

/// Computes CRC32 (IEEE polynomial) of data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal_image(payloads: &[&[u8]]) -> Vec<u8> {
        let mut bytes = JOURNAL_MAGIC.to_vec();
        for payload in payloads {
            bytes.extend(encode_frame(payload).unwrap());
        }
        bytes
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn scan_reads_every_frame() {
        let image = journal_image(&[b"one", b"two"]);
        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.payloads, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(scan.valid_len, image.len() as u64);
        assert!(scan.damage.is_none());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let mut image = journal_image(&[b"kept"]);
        let intact = image.len() as u64;
        let torn = encode_frame(b"lost in a crash").unwrap();
        image.extend_from_slice(&torn[..torn.len() - 3]);

        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.payloads.len(), 1);
        assert_eq!(scan.valid_len, intact);
        assert!(scan.damage.unwrap().contains("truncated"));
    }

    #[test]
    fn flipped_bit_stops_the_scan() {
        let mut image = journal_image(&[b"first", b"second"]);
        let last = image.len() - 1;
        image[last] ^= 0x01;
        let scan = scan_frames(&image).unwrap();
        assert_eq!(scan.payloads.len(), 1);
        assert!(scan.damage.unwrap().contains("checksum"));
    }

    #[test]
    fn foreign_file_is_rejected() {
        assert!(matches!(
            scan_frames(b"SQLite format 3"),
            Err(CoreError::InvalidStore { .. })
        ));
    }

    #[test]
    fn ops_survive_cbor() {
        let ops = vec![
            JournalOp::Team(
                Record::active(
                    TeamId(1),
                    Team {
                        name: "Blue".into(),
                    },
                    Timestamp::from_millis(5),
                ),
                Timestamp::from_millis(5),
            ),
            JournalOp::PitlaneCurrent(
                Record::tombstone(PitlaneEntryId(9), Timestamp::from_millis(6)),
                Timestamp::from_millis(9),
            ),
            JournalOp::PurgeRaceTeam(RaceTeamKey::new(RaceId(1), TeamId(2))),
            JournalOp::Checkpoint(Timestamp::from_millis(7)),
            JournalOp::Pushed(Timestamp::from_millis(8)),
        ];
        let decoded = decode_ops(&encode_ops(&ops).unwrap()).unwrap();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn apply_updates_tables_and_meta() {
        let mut tables = Tables::default();
        JournalOp::Kart(
            Record::active(
                KartId(3),
                Kart {
                    race_id: RaceId(1),
                    status: 2,
                    team_id: None,
                },
                Timestamp::from_millis(1),
            ),
            Timestamp::from_millis(20),
        )
        .apply(&mut tables);
        JournalOp::Checkpoint(Timestamp::from_millis(50)).apply(&mut tables);
        JournalOp::Pushed(Timestamp::from_millis(40)).apply(&mut tables);
        assert_eq!(tables.live::<Kart>(&KartId(3)).unwrap().status, 2);
        assert_eq!(
            tables.received_at::<Kart>(&KartId(3)),
            Some(Timestamp::from_millis(20))
        );
        assert_eq!(tables.meta().last_sync, Timestamp::from_millis(50));
        assert_eq!(tables.meta().pushed_through, Timestamp::from_millis(40));

        JournalOp::PurgeKart(KartId(3)).apply(&mut tables);
        assert!(tables.get::<Kart>(&KartId(3)).is_none());
    }
}
