//! # Storage Error Types
//!
//! All errors that can occur in the on-disk layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying filesystem failure.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// An existing region file failed structural validation.
    ///
    /// Recovered internally by rewriting the region from staged data;
    /// callers only see this when reading an archive directly.
    #[error("corrupt region file {path}: {reason}")]
    CorruptRegion {
        /// Path of the offending file.
        path: PathBuf,
        /// What failed to validate.
        reason: String,
    },

    /// The entity store failed structural validation.
    #[error("corrupt entity store: {reason}")]
    CorruptEntityStore {
        /// What failed to validate.
        reason: String,
    },

    /// A chunk payload exceeds what the slot table can address.
    #[error("chunk payload too large: {len} bytes")]
    PayloadTooLarge {
        /// Serialized payload length.
        len: usize,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
