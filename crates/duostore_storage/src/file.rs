//! File-backed storage using an append-only change log.
//!
//! Store directory layout:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK         # Advisory lock for single-process access
//! └─ store.log    # Append-only change log, CRC-framed entries
//! ```
//!
//! Every applied batch is appended to `store.log` as a sequence of framed
//! entries. On open the log is replayed into an in-memory index, so reads
//! never touch the file. A torn final entry (crash mid-append) is dropped
//! and the log is truncated back to the last whole entry; corruption
//! anywhere earlier is an error.

use crate::backend::{BatchOp, CommitBatch, RecordKey, StoreBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "store.log";

/// Frame header: entry length (u32) + CRC32 (u32).
const FRAME_HEADER_LEN: usize = 8;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// A persistent record store backed by an append-only log file.
///
/// # Thread Safety
///
/// The backend holds an exclusive advisory lock on its directory for its
/// whole lifetime; only one `FileBackend` can exist per directory at a
/// time, across processes.
#[derive(Debug)]
pub struct FileBackend {
    /// Store directory.
    path: PathBuf,
    /// Log file handle, positioned at the end.
    log: File,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
    /// Replayed live records.
    tables: HashMap<String, BTreeMap<RecordKey, Vec<u8>>>,
}

impl FileBackend {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the lock (`Locked`)
    /// - The change log is corrupted before its final entry
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;

        let mut log = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path.join(LOG_FILE))?;

        let tables = Self::replay(&mut log)?;
        log.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            log,
            _lock_file: lock_file,
            tables,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the change log into a fresh table index.
    ///
    /// Truncates the file past the last whole entry if the tail is torn.
    fn replay(log: &mut File) -> StorageResult<HashMap<String, BTreeMap<RecordKey, Vec<u8>>>> {
        let mut bytes = Vec::new();
        log.seek(SeekFrom::Start(0))?;
        log.read_to_end(&mut bytes)?;

        let mut tables: HashMap<String, BTreeMap<RecordKey, Vec<u8>>> = HashMap::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < FRAME_HEADER_LEN {
                // Torn header at the tail; drop it.
                log.set_len(offset as u64)?;
                break;
            }

            let entry_len = u32::from_le_bytes(
                bytes[offset..offset + 4].try_into().expect("4-byte slice"),
            ) as usize;
            let stored_crc = u32::from_le_bytes(
                bytes[offset + 4..offset + 8].try_into().expect("4-byte slice"),
            );

            if remaining - FRAME_HEADER_LEN < entry_len {
                // Torn entry at the tail; drop it.
                log.set_len(offset as u64)?;
                break;
            }

            let entry = &bytes[offset + FRAME_HEADER_LEN..offset + FRAME_HEADER_LEN + entry_len];
            let actual_crc = crc32(entry);
            if actual_crc != stored_crc {
                if offset + FRAME_HEADER_LEN + entry_len == bytes.len() {
                    // Corrupt final entry is treated as a torn tail.
                    log.set_len(offset as u64)?;
                    break;
                }
                return Err(StorageError::corrupted(format!(
                    "CRC mismatch at offset {offset}: expected {stored_crc:08x}, got {actual_crc:08x}"
                )));
            }

            Self::apply_entry(&mut tables, entry)?;
            offset += FRAME_HEADER_LEN + entry_len;
        }

        Ok(tables)
    }

    /// Decodes one entry and applies it to the table index.
    fn apply_entry(
        tables: &mut HashMap<String, BTreeMap<RecordKey, Vec<u8>>>,
        entry: &[u8],
    ) -> StorageResult<()> {
        let mut pos = 0usize;

        let op = *entry
            .first()
            .ok_or_else(|| StorageError::corrupted("empty log entry"))?;
        pos += 1;

        if entry.len() < pos + 2 {
            return Err(StorageError::corrupted("log entry too short for table length"));
        }
        let table_len =
            u16::from_le_bytes(entry[pos..pos + 2].try_into().expect("2-byte slice")) as usize;
        pos += 2;

        if entry.len() < pos + table_len + 16 {
            return Err(StorageError::corrupted("log entry too short for table and key"));
        }
        let table = std::str::from_utf8(&entry[pos..pos + table_len])
            .map_err(|_| StorageError::corrupted("log entry table name is not UTF-8"))?
            .to_string();
        pos += table_len;

        let key: RecordKey = entry[pos..pos + 16].try_into().expect("16-byte slice");
        pos += 16;

        match op {
            OP_PUT => {
                if entry.len() < pos + 4 {
                    return Err(StorageError::corrupted("log entry too short for payload length"));
                }
                let payload_len =
                    u32::from_le_bytes(entry[pos..pos + 4].try_into().expect("4-byte slice"))
                        as usize;
                pos += 4;
                if entry.len() != pos + payload_len {
                    return Err(StorageError::corrupted("log entry payload length mismatch"));
                }
                let payload = entry[pos..].to_vec();
                tables.entry(table).or_default().insert(key, payload);
            }
            OP_DELETE => {
                if entry.len() != pos {
                    return Err(StorageError::corrupted("delete entry has trailing bytes"));
                }
                if let Some(t) = tables.get_mut(&table) {
                    t.remove(&key);
                }
            }
            other => {
                return Err(StorageError::corrupted(format!(
                    "unknown log entry op {other}"
                )));
            }
        }

        Ok(())
    }

    /// Encodes one batch op as a framed log entry into `out`.
    fn frame_op(out: &mut Vec<u8>, op: &BatchOp) {
        let mut entry = Vec::new();
        match op {
            BatchOp::Put {
                table,
                key,
                payload,
            } => {
                entry.push(OP_PUT);
                entry.extend_from_slice(&(table.len() as u16).to_le_bytes());
                entry.extend_from_slice(table.as_bytes());
                entry.extend_from_slice(key);
                entry.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                entry.extend_from_slice(payload);
            }
            BatchOp::Delete { table, key } => {
                entry.push(OP_DELETE);
                entry.extend_from_slice(&(table.len() as u16).to_le_bytes());
                entry.extend_from_slice(table.as_bytes());
                entry.extend_from_slice(key);
            }
        }

        out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32(&entry).to_le_bytes());
        out.extend_from_slice(&entry);
    }
}

impl StoreBackend for FileBackend {
    fn get(&self, table: &str, key: &RecordKey) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(RecordKey, Vec<u8>)>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default())
    }

    fn apply(&mut self, batch: &CommitBatch) -> StorageResult<()> {
        let mut framed = Vec::new();
        for op in batch.ops() {
            Self::frame_op(&mut framed, op);
        }

        // One write for the whole batch, then index update.
        self.log.write_all(&framed)?;

        for op in batch.ops() {
            match op {
                BatchOp::Put {
                    table,
                    key,
                    payload,
                } => {
                    self.tables
                        .entry(table.clone())
                        .or_default()
                        .insert(*key, payload.clone());
                }
                BatchOp::Delete { table, key } => {
                    if let Some(t) = self.tables.get_mut(table) {
                        t.remove(key);
                    }
                }
            }
        }

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.log.flush()?;
        self.log.sync_data()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

/// Computes a CRC32 (IEEE) checksum.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn key(n: u8) -> RecordKey {
        [n; 16]
    }

    #[test]
    fn crc32_known_value() {
        // Standard CRC32 test vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0x0000_0000);
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.is_empty());
        assert!(path.join("LOCK").exists());
        assert!(path.join("store.log").exists());
    }

    #[test]
    fn lock_is_exclusive() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let _backend = FileBackend::open(&path).unwrap();
        }
        assert!(FileBackend::open(&path).is_ok());
    }

    #[test]
    fn records_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            let mut batch = CommitBatch::new();
            batch.put("players", key(1), vec![1, 2, 3]);
            batch.put("players", key(2), vec![4]);
            batch.delete("players", key(2));
            backend.apply(&batch).unwrap();
            backend.flush().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("players", &key(1)).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(backend.get("players", &key(2)).unwrap(), None);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            let mut batch = CommitBatch::new();
            batch.put("players", key(1), vec![1]);
            backend.apply(&batch).unwrap();
            backend.flush().unwrap();
        }

        // Append garbage that looks like a partial frame.
        {
            let mut log = OpenOptions::new()
                .append(true)
                .open(path.join("store.log"))
                .unwrap();
            log.write_all(&[0xFF, 0x00, 0x00, 0x00, 0xAA]).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("players", &key(1)).unwrap(), Some(vec![1]));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn corrupt_final_entry_is_dropped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            let mut batch = CommitBatch::new();
            batch.put("players", key(1), vec![1]);
            backend.apply(&batch).unwrap();
            backend.flush().unwrap();
        }

        // Flip a payload byte in the last (only) entry.
        {
            let log_path = path.join("store.log");
            let mut bytes = fs::read(&log_path).unwrap();
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
            fs::write(&log_path, &bytes).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn corrupt_interior_entry_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            for n in 0..2 {
                let mut batch = CommitBatch::new();
                batch.put("players", key(n), vec![n]);
                backend.apply(&batch).unwrap();
            }
            backend.flush().unwrap();
        }

        // Flip a byte inside the first entry's payload region.
        {
            let log_path = path.join("store.log");
            let mut bytes = fs::read(&log_path).unwrap();
            bytes[FRAME_HEADER_LEN + 4] ^= 0xFF;
            fs::write(&log_path, &bytes).unwrap();
        }

        let result = FileBackend::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn scan_matches_memory_semantics() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        let mut backend = FileBackend::open(&path).unwrap();
        let mut batch = CommitBatch::new();
        batch.put("players", key(3), vec![3]);
        batch.put("players", key(1), vec![1]);
        backend.apply(&batch).unwrap();

        let rows = backend.scan("players").unwrap();
        assert_eq!(rows[0].0, key(1));
        assert_eq!(rows[1].0, key(3));
    }

    proptest! {
        #[test]
        fn replay_reproduces_applied_state(
            entries in proptest::collection::vec(
                (any::<u8>(), any::<bool>(), proptest::collection::vec(any::<u8>(), 0..64)),
                0..32,
            )
        ) {
            let temp = tempdir().unwrap();
            let path = temp.path().join("store");

            let mut expected: BTreeMap<RecordKey, Vec<u8>> = BTreeMap::new();
            {
                let mut backend = FileBackend::open(&path).unwrap();
                for (k, is_put, payload) in &entries {
                    let mut batch = CommitBatch::new();
                    if *is_put {
                        batch.put("t", key(*k), payload.clone());
                        expected.insert(key(*k), payload.clone());
                    } else {
                        batch.delete("t", key(*k));
                        expected.remove(&key(*k));
                    }
                    backend.apply(&batch).unwrap();
                }
                backend.flush().unwrap();
            }

            let backend = FileBackend::open(&path).unwrap();
            let rows: BTreeMap<RecordKey, Vec<u8>> =
                backend.scan("t").unwrap().into_iter().collect();
            prop_assert_eq!(rows, expected);
        }
    }
}
