//! In-memory journal.

use super::{encode_frame, scan_frames, Journal, JOURNAL_MAGIC};
use crate::error::CoreResult;

/// A journal kept in a byte vector.
///
/// Uses the same framing as [`super::FileJournal`], so replay behaves
/// identically; data is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    bytes: Vec<u8>,
    frames: usize,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal over an existing image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, frames: 0 }
    }

    /// The raw journal image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Journal for MemoryJournal {
    fn load(&mut self) -> CoreResult<Vec<Vec<u8>>> {
        let scan = scan_frames(&self.bytes)?;
        if let Some(damage) = &scan.damage {
            tracing::warn!(%damage, "discarding damaged journal tail");
            self.bytes.truncate(scan.valid_len as usize);
        }
        self.frames = scan.payloads.len();
        Ok(scan.payloads)
    }

    fn append(&mut self, payload: &[u8]) -> CoreResult<()> {
        let frame = encode_frame(payload)?;
        if self.bytes.is_empty() {
            self.bytes.extend_from_slice(&JOURNAL_MAGIC);
        }
        self.bytes.extend_from_slice(&frame);
        self.frames += 1;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> CoreResult<()> {
        let mut bytes = JOURNAL_MAGIC.to_vec();
        for payload in payloads {
            bytes.extend(encode_frame(payload)?);
        }
        self.bytes = bytes;
        self.frames = payloads.len();
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.frames
    }

    fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_load() {
        let mut journal = MemoryJournal::new();
        journal.append(b"a").unwrap();
        journal.append(b"b").unwrap();
        assert_eq!(journal.frame_count(), 2);

        let mut reopened = MemoryJournal::from_bytes(journal.as_bytes().to_vec());
        assert_eq!(reopened.load().unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(reopened.frame_count(), 2);
    }

    #[test]
    fn load_truncates_damage() {
        let mut journal = MemoryJournal::new();
        journal.append(b"good").unwrap();
        let good_len = journal.size_bytes();
        let mut bytes = journal.as_bytes().to_vec();
        bytes.extend_from_slice(&[7, 0, 0]);

        let mut reopened = MemoryJournal::from_bytes(bytes);
        assert_eq!(reopened.load().unwrap().len(), 1);
        assert_eq!(reopened.size_bytes(), good_len);
    }

    #[test]
    fn rewrite_replaces_frames() {
        let mut journal = MemoryJournal::new();
        for _ in 0..5 {
            journal.append(b"x").unwrap();
        }
        journal.rewrite(&[b"snapshot".to_vec()]).unwrap();
        assert_eq!(journal.frame_count(), 1);
        assert_eq!(journal.load().unwrap(), vec![b"snapshot".to_vec()]);
    }
}
