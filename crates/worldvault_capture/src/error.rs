//! # Capture Error Types
//!
//! Session-lifecycle errors surfaced to control-API callers.
//!
//! Persistence-layer trouble (corrupt regions, transient I/O) is by
//! policy contained in the persistence context and reported through
//! [`crate::CaptureStats`], never through these variants.

use std::path::PathBuf;
use thiserror::Error;
use worldvault_storage::StorageError;

/// Errors surfaced by the capture control API.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// `start` was called while a session is already active.
    #[error("already capturing")]
    AlreadyCapturing,

    /// `stop` was called with no active session.
    #[error("not capturing")]
    NotCapturing,

    /// The archive target path could not be created or opened.
    #[error("capture target unavailable: {path}")]
    TargetUnavailable {
        /// The rejected target path.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The producer was blocked on a full staging buffer past the
    /// configured timeout.
    #[error("staging buffer full: producer blocked past {timeout_ms} ms")]
    BackpressureTimeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The final flush did not finish within the stop timeout. The
    /// session is still reset to idle and a partial-stop warning is
    /// recorded in the statistics.
    #[error("final flush did not complete within {timeout_ms} ms")]
    StopTimeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The configuration file failed to parse.
    #[error("invalid capture configuration: {0}")]
    InvalidConfig(#[from] toml::de::Error),

    /// A storage-layer failure on the control path (archive setup).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
