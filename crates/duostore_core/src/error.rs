//! Error types for the coordinator.

use crate::types::ContextKind;
use std::io;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in coordinator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] duostore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attribute payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The durable store could not be opened.
    #[error("store open failed: {source}")]
    StoreOpen {
        /// The underlying storage failure.
        #[source]
        source: duostore_storage::StorageError,
    },

    /// The pre-open migration procedure failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// A context's pending changes could not be persisted.
    ///
    /// The pending change set is left intact; the save may be retried.
    #[error("save failed: {source}")]
    SaveFailed {
        /// The underlying storage failure.
        #[source]
        source: duostore_storage::StorageError,
    },

    /// An attribute map names a key the entity schema does not declare.
    #[error("unknown attribute `{attribute}` for entity `{entity}`")]
    UnknownAttribute {
        /// The entity name.
        entity: String,
        /// The offending attribute key.
        attribute: String,
    },

    /// A record owned by one context was mutated through the other.
    #[error("context mismatch: record belongs to the {actual} context, operation ran on {expected}")]
    ContextMismatch {
        /// The context the operation executed in.
        expected: ContextKind,
        /// The context that owns the record.
        actual: ContextKind,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates an unknown attribute error.
    pub fn unknown_attribute(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }
}
