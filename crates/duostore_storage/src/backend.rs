//! Store backend trait and commit batch definitions.

use crate::error::StorageResult;

/// Opaque 16-byte record key.
///
/// The coordinator derives keys from record identities; backends treat
/// them as raw bytes.
pub type RecordKey = [u8; 16];

/// A single operation within a commit batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a record payload.
    Put {
        /// Table (entity) name.
        table: String,
        /// Record key.
        key: RecordKey,
        /// Encoded record payload.
        payload: Vec<u8>,
    },
    /// Remove a record.
    Delete {
        /// Table (entity) name.
        table: String,
        /// Record key.
        key: RecordKey,
    },
}

/// An ordered set of operations committed as one unit.
///
/// Backends apply batches front to back; a later op on the same key wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    ops: Vec<BatchOp>,
}

impl CommitBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a put operation.
    pub fn put(&mut self, table: impl Into<String>, key: RecordKey, payload: Vec<u8>) {
        self.ops.push(BatchOp::Put {
            table: table.into(),
            key,
            payload,
        });
    }

    /// Adds a delete operation.
    pub fn delete(&mut self, table: impl Into<String>, key: RecordKey) {
        self.ops.push(BatchOp::Delete {
            table: table.into(),
            key,
        });
    }

    /// Returns the operations in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A durable record store for DuoStore.
///
/// Backends are **opaque keyed byte stores**. They hold committed payloads
/// under `(table, key)` and know nothing about how payloads are encoded.
///
/// # Invariants
///
/// - `get` returns exactly the payload last applied for that key
/// - `scan` returns a table's records in stable, key-ascending order
/// - after `flush` returns, all applied batches survive process exit
/// - implementations must be `Send + Sync`; mutation only via `&mut self`
pub trait StoreBackend: Send + Sync {
    /// Reads the payload for a key, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn get(&self, table: &str, key: &RecordKey) -> StorageResult<Option<Vec<u8>>>;

    /// Returns all records in a table, ordered by key bytes.
    ///
    /// An unknown table is an empty table, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn scan(&self, table: &str) -> StorageResult<Vec<(RecordKey, Vec<u8>)>>;

    /// Applies a commit batch.
    ///
    /// On success the whole batch is visible to subsequent reads. On error
    /// the backend reports the batch as not applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be recorded.
    fn apply(&mut self, batch: &CommitBatch) -> StorageResult<()>;

    /// Makes all previously applied batches durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the total number of live records across all tables.
    fn len(&self) -> usize;

    /// Returns true if no live records exist.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
