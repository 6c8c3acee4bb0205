//! Append-only file store.
//!
//! Storage format: length-prefixed protobuf changeset frames.
//!   [4-byte LE length][ProtoChangeSet bytes][4-byte LE length]...
//!
//! Rules:
//!   - Strict append only, no rewriting of earlier frames
//!   - fsync after every frame
//!   - Sequence strictly increasing, starting at 1
//!   - On open every frame is replayed into an in-memory store, which
//!     then serves all reads and snapshots

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledger_kernel::error::StorageError;
use ledger_kernel::storage::{ChangeSet, MemoryStore, ReadOnlyStore, Store};
use prost::Message;
use thiserror::Error;
use tracing::{debug, info};

use crate::proto_types::ProtoChangeSet;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("sequence violation: expected {expected}, got {got}")]
    SequenceViolation { expected: u64, got: u64 },
    #[error("invalid frame length {0}")]
    InvalidFrameLength(usize),
    #[error("truncated frame after sequence {0}")]
    Truncated(u64),
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<StoreError> for StorageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Storage(inner) => inner,
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Durable [`Store`] backed by a changeset log.
pub struct FileStore {
    path: PathBuf,
    last_sequence: u64,
    memory: MemoryStore,
}

impl FileStore {
    /// Open or create the log at `path` and rebuild the in-memory view.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut memory = MemoryStore::new();
        let mut last_sequence = 0;
        for frame in Self::read_frames(path)? {
            let expected = last_sequence + 1;
            if frame.sequence != expected {
                return Err(StoreError::SequenceViolation {
                    expected,
                    got: frame.sequence,
                });
            }
            last_sequence = frame.sequence;
            memory.commit(&frame.into_change_set())?;
        }
        info!(path = %path.display(), frames = last_sequence, keys = memory.len(), "file store opened");

        Ok(Self {
            path: path.to_path_buf(),
            last_sequence,
            memory,
        })
    }

    /// Append one frame. Its sequence must be exactly one past the last.
    pub fn append(&mut self, frame: &ProtoChangeSet) -> Result<(), StoreError> {
        let expected = self.last_sequence + 1;
        if frame.sequence != expected {
            return Err(StoreError::SequenceViolation {
                expected,
                got: frame.sequence,
            });
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let buf = frame.encode_to_vec();
        let len = buf.len() as u32;
        {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&buf)?;
            writer.flush()?;
        }
        file.sync_all()?;

        self.last_sequence = frame.sequence;
        debug!(sequence = frame.sequence, entries = frame.entries.len(), bytes = buf.len(), "frame appended");
        Ok(())
    }

    /// Every frame currently on disk, in sequence order.
    pub fn load_all(&self) -> Result<Vec<ProtoChangeSet>, StoreError> {
        Self::read_frames(&self.path)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The replayed in-memory view.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn read_frames(path: &Path) -> Result<Vec<ProtoChangeSet>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut frames: Vec<ProtoChangeSet> = Vec::new();
        let mut len_buf = [0u8; 4];

        loop {
            let last = frames.last().map(|f| f.sequence).unwrap_or(0);
            match read_prefix(&mut reader, &mut len_buf)? {
                0 => break,
                4 => {}
                _ => return Err(StoreError::Truncated(last)),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(StoreError::InvalidFrameLength(len));
            }

            let mut frame = vec![0u8; len];
            reader.read_exact(&mut frame).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => StoreError::Truncated(last),
                _ => StoreError::Io(e),
            })?;
            frames.push(ProtoChangeSet::decode(frame.as_slice())?);
        }

        Ok(frames)
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before
/// end of file. Anything short of `buf.len()` is a torn prefix unless zero.
fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl Store for FileStore {
    fn snapshot(&self) -> Arc<dyn ReadOnlyStore> {
        self.memory.snapshot()
    }

    /// Durable first: the frame is fsynced before memory sees the writes.
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError> {
        let frame = ProtoChangeSet::from_change_set(self.last_sequence + 1, changes);
        self.append(&frame)?;
        self.memory.commit(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(pairs: &[(&[u8], Option<&[u8]>)]) -> ChangeSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_vec(), v.map(|v| v.to_vec())))
            .collect()
    }

    #[test]
    fn test_commits_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain").join("changes.log");
        {
            let mut store = FileStore::open(&path).unwrap();
            store.commit(&changes(&[(b"a", Some(b"1")), (b"b", Some(b"2"))])).unwrap();
            store.commit(&changes(&[(b"a", None), (b"c", Some(b"3"))])).unwrap();
            assert_eq!(store.last_sequence(), 2);
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.last_sequence(), 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.try_get(b"a").unwrap(), None);
        assert_eq!(snapshot.try_get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(snapshot.try_get(b"c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_append_rejects_sequence_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(&dir.path().join("changes.log")).unwrap();
        let frame = ProtoChangeSet::from_change_set(2, &changes(&[(b"a", Some(b"1"))]));
        match store.append(&frame) {
            Err(StoreError::SequenceViolation { expected: 1, got: 2 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(store.last_sequence(), 0);
    }

    #[test]
    fn test_truncated_tail_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.log");
        {
            let mut store = FileStore::open(&path).unwrap();
            store.commit(&changes(&[(b"a", Some(b"1"))])).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        assert!(matches!(FileStore::open(&path), Err(StoreError::Truncated(1))));
    }

    #[test]
    fn test_torn_length_prefix_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.log");
        {
            let mut store = FileStore::open(&path).unwrap();
            store.commit(&changes(&[(b"a", Some(b"1"))])).unwrap();
            store.commit(&changes(&[(b"b", Some(b"2"))])).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0]).unwrap();
        drop(file);

        assert!(matches!(FileStore::open(&path), Err(StoreError::Truncated(2))));
    }
}
