//! Journal damage helpers for crash recovery tests.
//!
//! A crash mid-append leaves a torn frame at the end of `journal.log`; a bad
//! sector flips bytes. Both must cost at most the last transaction.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Name of the journal inside a store directory.
pub const JOURNAL_FILE: &str = "journal.log";

/// How to damage a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalDamage {
    /// Cut this many bytes off the end, as a crash during append would.
    TornTail {
        /// Bytes removed.
        bytes: u64,
    },
    /// Invert the byte this far from the end.
    FlippedByte {
        /// Distance from the end, 1 is the last byte.
        from_end: u64,
    },
    /// Append bytes that do not form a frame.
    Garbage {
        /// Bytes appended.
        bytes: usize,
    },
}

/// Applies `damage` to the journal in `store_dir`.
///
/// The store must be closed.
pub fn damage_journal(store_dir: &Path, damage: JournalDamage) -> io::Result<()> {
    let path = store_dir.join(JOURNAL_FILE);
    let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
    let len = file.metadata()?.len();

    match damage {
        JournalDamage::TornTail { bytes } => file.set_len(len.saturating_sub(bytes))?,
        JournalDamage::FlippedByte { from_end } => {
            let offset = len.checked_sub(from_end).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "offset before start of journal")
            })?;
            let mut byte = [0u8; 1];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut byte)?;
            byte[0] = !byte[0];
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&byte)?;
        }
        JournalDamage::Garbage { bytes } => {
            file.seek(SeekFrom::End(0))?;
            file.write_all(&vec![0xAB; bytes])?;
        }
    }
    file.sync_all()
}

/// Size of the journal in `store_dir`.
pub fn journal_len(store_dir: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(store_dir.join(JOURNAL_FILE))?.len())
}

/// Result of a crash recovery check.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether recovery kept what it should have.
    pub passed: bool,
    /// Description of the damage.
    pub description: String,
    /// Rows expected after recovery.
    pub expected_rows: usize,
    /// Rows found after recovery.
    pub actual_rows: usize,
}

impl CrashRecoveryResult {
    /// Compares the rows found after recovery with those expected.
    pub fn check(damage: JournalDamage, expected_rows: usize, actual_rows: usize) -> Self {
        Self {
            passed: expected_rows == actual_rows,
            description: format!("{damage:?}"),
            expected_rows,
            actual_rows,
        }
    }
}
