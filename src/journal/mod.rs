//! Durable mutation journal.
//!
//! Every applied mutation is appended as one checksummed block before the
//! next apply proceeds, and replayed in order on restart to rebuild the
//! store. Block layout, little-endian:
//!
//! ```text
//! | len: u32 | checksum: u64 (xxhash64 of payload) | payload: len bytes |
//! ```
//!
//! A block that fails its checksum, or a mid-block truncation, is a
//! journal error; replay stops there rather than guess at what follows.

use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use twox_hash::XxHash64;

use crate::core::error::{ConcordError, ConcordResult};
use crate::store::Store;

/// Upper bound on one mutation's encoded size; anything larger in a
/// length header means the file is damaged.
const MAX_RECORD: u32 = 16 * 1024 * 1024;

fn checksum(payload: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(payload);
    hasher.finish()
}

/// Append half of the journal.
pub struct Journal {
    file: File,
    path: PathBuf,
    appended: u64,
}

impl Journal {
    /// Opens (creating if absent) the journal at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> ConcordResult<Journal> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| journal_err(&path, "open", err))?;
        Ok(Journal {
            file,
            path,
            appended: 0,
        })
    }

    /// Appends one mutation and syncs it to stable storage before
    /// returning. An append that errors leaves the journal unusable.
    pub fn append(&mut self, mutation: &str) -> ConcordResult<()> {
        let payload = mutation.as_bytes();
        let mut block = Vec::with_capacity(12 + payload.len());
        block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        block.extend_from_slice(&checksum(payload).to_le_bytes());
        block.extend_from_slice(payload);
        self.file
            .write_all(&block)
            .map_err(|err| journal_err(&self.path, "append", err))?;
        self.file
            .sync_data()
            .map_err(|err| journal_err(&self.path, "sync", err))?;
        self.appended += 1;
        Ok(())
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }
}

/// Sequential reader over journal blocks.
pub struct JournalReader {
    reader: BufReader<File>,
    path: PathBuf,
}

impl JournalReader {
    pub fn open(path: impl AsRef<Path>) -> ConcordResult<JournalReader> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| journal_err(&path, "open", err))?;
        Ok(JournalReader {
            reader: BufReader::new(file),
            path,
        })
    }

    /// Reads the next mutation. `Ok(None)` at a clean end of file.
    pub fn next(&mut self) -> ConcordResult<Option<String>> {
        // Fill the header by hand so a clean end of file (zero bytes) can
        // be told apart from a torn one (some bytes).
        let mut header = [0u8; 12];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(journal_err(&self.path, "read", err)),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(ConcordError::journal(format!(
                "{}: truncated block header",
                self.path.display()
            )));
        }
        let len = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let sum = u64::from_le_bytes(header[4..12].try_into().unwrap());
        if len > MAX_RECORD {
            return Err(ConcordError::journal(format!(
                "{}: implausible block length {len}",
                self.path.display()
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|err| journal_err(&self.path, "read payload", err))?;
        if checksum(&payload) != sum {
            return Err(ConcordError::journal(format!(
                "{}: checksum mismatch",
                self.path.display()
            )));
        }
        String::from_utf8(payload)
            .map(Some)
            .map_err(|_| ConcordError::journal(format!("{}: non-utf8 payload", self.path.display())))
    }
}

/// Replays the journal at `path` into `store`, returning the last applied
/// seqn. A missing file is an empty journal.
pub fn replay(path: impl AsRef<Path>, store: &Store) -> ConcordResult<u64> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no journal to replay");
        return Ok(0);
    }
    let mut reader = JournalReader::open(path)?;
    let mut seqn = store.seqn();
    while let Some(mutation) = reader.next()? {
        seqn += 1;
        store.apply(seqn, &mutation)?;
    }
    info!(seqn, path = %path.display(), "journal replayed");
    Ok(seqn)
}

fn journal_err(path: &Path, op: &str, err: std::io::Error) -> ConcordError {
    ConcordError::journal(format!("{}: {op}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mutation::Cas;
    use crate::store::encode_set;

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(":/a=1").unwrap();
        journal.append("5:/a=2").unwrap();
        journal.append("nop:").unwrap();
        assert_eq!(journal.appended(), 3);

        let mut reader = JournalReader::open(&path).unwrap();
        assert_eq!(reader.next().unwrap().as_deref(), Some(":/a=1"));
        assert_eq!(reader.next().unwrap().as_deref(), Some("5:/a=2"));
        assert_eq!(reader.next().unwrap().as_deref(), Some("nop:"));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn corrupt_payload_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(":/a=hello").unwrap();
        drop(journal);

        // Flip one payload byte.
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        let err = reader.next().unwrap_err();
        assert!(matches!(err, ConcordError::Journal { .. }));
    }

    #[test]
    fn truncated_tail_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(":/a=1").unwrap();
        journal.append(":/b=2").unwrap();
        drop(journal);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let mut reader = JournalReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_some());
        assert!(reader.next().is_err());
    }

    #[test]
    fn replay_rebuilds_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let mut journal = Journal::open(&path).unwrap();
        journal
            .append(&encode_set("/a", "1", Cas::Clobber).unwrap())
            .unwrap();
        journal
            .append(&encode_set("/b/c", "2", Cas::Clobber).unwrap())
            .unwrap();
        journal.append("nop:").unwrap();
        drop(journal);

        let store = Store::new();
        let seqn = replay(&path, &store).unwrap();
        assert_eq!(seqn, 3);
        assert_eq!(store.get("/a").0, vec!["1".to_string()]);
        assert_eq!(store.get("/b/c"), (vec!["2".to_string()], Cas::At(2)));
    }

    #[test]
    fn missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new();
        assert_eq!(replay(dir.path().join("none"), &store).unwrap(), 0);
    }
}
