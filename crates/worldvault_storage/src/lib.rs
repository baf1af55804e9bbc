//! # WorldVault Storage
//!
//! The on-disk layer of the WorldVault capture engine.
//!
//! A capture target is a plain directory:
//!
//! ```text
//! <target>/
//!   region/r.<rx>.<rz>.wvr    region files (32x32 chunk grid each)
//!   entities.wve              entity snapshot store
//! ```
//!
//! ## Guarantees
//!
//! 1. **Always loadable**: every flush replaces files atomically, so a
//!    reader opening the archive mid-capture sees only structurally
//!    valid data.
//! 2. **Monotonic completeness**: a stored chunk is never overwritten
//!    by a less complete observation of the same chunk.
//! 3. **Deterministic layout**: serializing the same logical region
//!    twice yields byte-identical files.
//!
//! ## Thread Safety
//!
//! [`RegionStore`] is single-owner by design. All writes to one
//! archive go through one persistence thread; that serialization is
//! what keeps the archive valid without file-level locking.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chunk;
pub mod error;
pub mod region;
pub mod store;

pub use chunk::{ChunkPayload, ChunkPos, ChunkRecord, Completeness, RegionPos};
pub use error::{StorageError, StorageResult};
pub use region::{RegionData, REGION_SPAN, SLOTS_PER_REGION};
pub use store::{EntitySnapshot, FlushReport, OverwritePolicy, RegionStore};
