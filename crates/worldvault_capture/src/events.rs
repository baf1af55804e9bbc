//! # Capture Events
//!
//! The message types the external event source hands to
//! [`crate::CaptureManager::ingest`].
//!
//! The observation mechanism itself (render/tick interception) lives
//! outside this crate; these types are the whole coupling surface.

use worldvault_storage::{ChunkPayload, ChunkPos, ChunkRecord, Completeness, EntitySnapshot};

/// A chunk observed streaming past the client.
#[derive(Clone, Debug)]
pub struct ChunkObservation {
    /// Chunk position.
    pub pos: ChunkPos,
    /// Level of detail this observation carries.
    pub completeness: Completeness,
    /// Serialized chunk sections.
    pub payload: ChunkPayload,
}

impl ChunkObservation {
    /// Creates a chunk observation.
    #[must_use]
    pub const fn new(pos: ChunkPos, completeness: Completeness, payload: ChunkPayload) -> Self {
        Self {
            pos,
            completeness,
            payload,
        }
    }

    /// Converts into a staging record.
    #[must_use]
    pub fn into_record(self) -> ChunkRecord {
        ChunkRecord::new(self.pos, self.completeness, self.payload)
    }
}

/// A mobile entity observed in the world.
#[derive(Clone, Debug)]
pub struct EntityObservation {
    /// The observed snapshot. Later observations of the same entity
    /// id supersede earlier ones.
    pub snapshot: EntitySnapshot,
}

impl EntityObservation {
    /// Creates an entity observation.
    #[must_use]
    pub const fn new(snapshot: EntitySnapshot) -> Self {
        Self { snapshot }
    }
}

/// Everything the event source can report.
#[derive(Clone, Debug)]
pub enum CaptureEvent {
    /// Terrain chunk data (full or LOD).
    Chunk(ChunkObservation),
    /// Mobile entity state.
    Entity(EntityObservation),
}

impl From<ChunkObservation> for CaptureEvent {
    fn from(obs: ChunkObservation) -> Self {
        Self::Chunk(obs)
    }
}

impl From<EntityObservation> for CaptureEvent {
    fn from(obs: EntityObservation) -> Self {
        Self::Entity(obs)
    }
}
