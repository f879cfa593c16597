//! File-backed journal.

use super::{encode_frame, scan_frames, Journal, JOURNAL_MAGIC};
use crate::error::CoreResult;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// - `append()` writes a whole frame with one `write_all`
/// - `sync()` calls `File::sync_data()`
/// - `rewrite()` writes a sibling temp file, syncs it and renames it over
///   the journal
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    size: u64,
    frames: usize,
}

impl FileJournal {
    /// Opens or creates the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            frames: 0,
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn load(&mut self) -> CoreResult<Vec<Vec<u8>>> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;

        let scan = scan_frames(&bytes)?;
        if let Some(damage) = &scan.damage {
            tracing::warn!(
                path = %self.path.display(),
                %damage,
                kept = scan.valid_len,
                "discarding damaged journal tail"
            );
            self.file.set_len(scan.valid_len)?;
            self.file.sync_all()?;
        }
        self.size = scan.valid_len.min(bytes.len() as u64);
        self.frames = scan.payloads.len();
        Ok(scan.payloads)
    }

    fn append(&mut self, payload: &[u8]) -> CoreResult<()> {
        let mut frame = Vec::new();
        if self.size == 0 {
            frame.extend_from_slice(&JOURNAL_MAGIC);
        }
        frame.extend(encode_frame(payload)?);

        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(&frame)?;
        self.size += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn rewrite(&mut self, payloads: &[Vec<u8>]) -> CoreResult<()> {
        let temp_path = self.path.with_extension("log.tmp");
        let mut bytes = JOURNAL_MAGIC.to_vec();
        for payload in payloads {
            bytes.extend(encode_frame(payload)?);
        }
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&bytes)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.size = bytes.len() as u64;
        self.frames = payloads.len();
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.frames
    }

    fn size_bytes(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn frames_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let mut journal = FileJournal::open(&path).unwrap();
            journal.load().unwrap();
            journal.append(b"first").unwrap();
            journal.append(b"second").unwrap();
            journal.sync().unwrap();
        }
        let mut journal = FileJournal::open(&path).unwrap();
        assert_eq!(
            journal.load().unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
        journal.append(b"third").unwrap();
        assert_eq!(journal.frame_count(), 3);
    }

    #[test]
    fn torn_tail_is_truncated_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        let intact;
        {
            let mut journal = FileJournal::open(&path).unwrap();
            journal.append(b"kept").unwrap();
            intact = journal.size_bytes();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xFF, 0xFF, 0x00]).unwrap();
        }
        let mut journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.load().unwrap().len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        journal.append(b"after").unwrap();
        let mut reopened = FileJournal::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().len(), 2);
    }

    #[test]
    fn rewrite_is_atomic_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        let mut journal = FileJournal::open(&path).unwrap();
        for _ in 0..10 {
            journal.append(b"delta").unwrap();
        }
        journal.rewrite(&[b"snapshot".to_vec()]).unwrap();
        assert!(!path.with_extension("log.tmp").exists());

        let mut reopened = FileJournal::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), vec![b"snapshot".to_vec()]);
    }
}
