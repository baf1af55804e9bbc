//! # WorldVault Capture
//!
//! The capture session engine: takes the partial, possibly-stale,
//! possibly-duplicate world data an event source observes during a
//! live session and persists it into a self-contained archive.
//!
//! ## Two execution contexts
//!
//! - **Producer context**: the external event source. Single-threaded,
//!   latency-sensitive, never waits on disk I/O. Its only entry point
//!   is [`CaptureManager::ingest`], which stages data in memory.
//! - **Persistence context**: exactly one background worker per active
//!   session. It drains the staging structures, merges into the
//!   archive through `worldvault_storage`, and accumulates statistics.
//!
//! The staging buffer and entity tracker are the only structures
//! shared between the two; everything else is single-owner.
//!
//! ## Example
//!
//! ```rust,ignore
//! use worldvault_capture::{CaptureConfig, CaptureManager, CaptureOrigin};
//!
//! let manager = CaptureManager::new(CaptureConfig::default());
//! manager.start("./out", CaptureOrigin::new("overworld", "MyServer", origin))?;
//! manager.ingest(event);          // called by the event source
//! manager.stop(false)?;           // drain, flush, back to idle
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod session;
pub mod staging;
pub mod stats;
pub mod tracker;
pub mod worker;

pub use config::CaptureConfig;
pub use error::{CaptureError, CaptureResult};
pub use events::{CaptureEvent, ChunkObservation, EntityObservation};
pub use manager::CaptureManager;
pub use session::{CaptureOrigin, SessionState};
pub use stats::CaptureStats;

pub use worldvault_storage::{
    ChunkPayload, ChunkPos, Completeness, EntitySnapshot, OverwritePolicy,
};
