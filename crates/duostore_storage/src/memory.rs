//! In-memory storage backend for testing.

use crate::backend::{BatchOp, CommitBatch, RecordKey, StoreBackend};
use crate::error::StorageResult;
use std::collections::{BTreeMap, HashMap};

/// An in-memory record store.
///
/// This backend keeps all tables in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// Tables are `BTreeMap`s keyed by record key bytes, so `scan` order is
/// deterministic.
///
/// # Example
///
/// ```rust
/// use duostore_storage::{CommitBatch, MemoryBackend, StoreBackend};
///
/// let mut backend = MemoryBackend::new();
/// let mut batch = CommitBatch::new();
/// batch.put("users", [1u8; 16], b"payload".to_vec());
/// backend.apply(&batch).unwrap();
/// assert_eq!(backend.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: HashMap<String, BTreeMap<RecordKey, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of tables that currently hold records.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Removes all records from all tables.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

impl StoreBackend for MemoryBackend {
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
        Ok(())
    }

    fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> RecordKey {
        [n; 16]
    }

    #[test]
    fn empty_backend() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.get("users", &key(1)).unwrap(), None);
        assert!(backend.scan("users").unwrap().is_empty());
    }

    #[test]
    fn put_get_delete() {
        let mut backend = MemoryBackend::new();

        let mut batch = CommitBatch::new();
        batch.put("users", key(1), vec![10]);
        backend.apply(&batch).unwrap();
        assert_eq!(backend.get("users", &key(1)).unwrap(), Some(vec![10]));

        let mut batch = CommitBatch::new();
        batch.delete("users", key(1));
        backend.apply(&batch).unwrap();
        assert_eq!(backend.get("users", &key(1)).unwrap(), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn later_op_wins_within_batch() {
        let mut backend = MemoryBackend::new();

        let mut batch = CommitBatch::new();
        batch.put("users", key(1), vec![1]);
        batch.put("users", key(1), vec![2]);
        backend.apply(&batch).unwrap();

        assert_eq!(backend.get("users", &key(1)).unwrap(), Some(vec![2]));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn scan_is_key_ordered() {
        let mut backend = MemoryBackend::new();

        let mut batch = CommitBatch::new();
        batch.put("users", key(3), vec![3]);
        batch.put("users", key(1), vec![1]);
        batch.put("users", key(2), vec![2]);
        backend.apply(&batch).unwrap();

        let rows = backend.scan("users").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, key(1));
        assert_eq!(rows[1].0, key(2));
        assert_eq!(rows[2].0, key(3));
    }

    #[test]
    fn tables_are_isolated() {
        let mut backend = MemoryBackend::new();

        let mut batch = CommitBatch::new();
        batch.put("users", key(1), vec![1]);
        batch.put("posts", key(1), vec![2]);
        backend.apply(&batch).unwrap();

        assert_eq!(backend.get("users", &key(1)).unwrap(), Some(vec![1]));
        assert_eq!(backend.get("posts", &key(1)).unwrap(), Some(vec![2]));
        assert_eq!(backend.len(), 2);
    }
}
