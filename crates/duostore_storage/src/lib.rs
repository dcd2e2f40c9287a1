//! # DuoStore Storage
//!
//! Durable record store trait and implementations for DuoStore.
//!
//! This crate is the opaque storage boundary of the coordinator. Backends
//! hold committed record payloads keyed by `(table, record key)` and apply
//! commit batches atomically from the caller's point of view. They do not
//! interpret payloads - encoding and decoding of record attributes is
//! entirely the coordinator's concern.
//!
//! ## Design Principles
//!
//! - Backends are keyed byte stores (get, scan, apply, flush)
//! - No knowledge of attribute encodings or entity schemas
//! - Must be `Send + Sync`; all mutation goes through `&mut self`
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - Persistent, append-only change log with CRC framing
//!
//! ## Example
//!
//! ```rust
//! use duostore_storage::{CommitBatch, MemoryBackend, StoreBackend};
//!
//! let mut backend = MemoryBackend::new();
//! let mut batch = CommitBatch::new();
//! batch.put("players", [7u8; 16], vec![1, 2, 3]);
//! backend.apply(&batch).unwrap();
//! assert_eq!(backend.get("players", &[7u8; 16]).unwrap(), Some(vec![1, 2, 3]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{BatchOp, CommitBatch, RecordKey, StoreBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
