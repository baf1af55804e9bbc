//! # Chunk Records
//!
//! Coordinate math and the serialized form of a captured chunk.
//!
//! A chunk is a fixed-size column of world data at a grid coordinate.
//! Chunks are grouped into regions of `REGION_SPAN` x `REGION_SPAN`
//! for on-disk storage.

use crate::region::REGION_SPAN;

/// World-grid chunk coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    /// Chunk X coordinate.
    pub x: i32,
    /// Chunk Z coordinate.
    pub z: i32,
}

impl ChunkPos {
    /// Creates a chunk position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the region containing this chunk.
    #[must_use]
    pub fn region(&self) -> RegionPos {
        RegionPos {
            x: self.x.div_euclid(REGION_SPAN as i32),
            z: self.z.div_euclid(REGION_SPAN as i32),
        }
    }

    /// Returns this chunk's slot index within its region table.
    ///
    /// Slots are laid out row-major: `(z & 31) * 32 + (x & 31)`.
    #[must_use]
    pub fn region_index(&self) -> usize {
        let lx = self.x.rem_euclid(REGION_SPAN as i32) as usize;
        let lz = self.z.rem_euclid(REGION_SPAN as i32) as usize;
        lz * REGION_SPAN + lx
    }

    /// Chebyshev distance to another chunk, in chunks.
    #[must_use]
    pub fn chebyshev_distance(&self, other: ChunkPos) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dz = self.z.abs_diff(other.z);
        dx.max(dz)
    }
}

/// Region-grid coordinate (one region = 32x32 chunks).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    /// Region X coordinate.
    pub x: i32,
    /// Region Z coordinate.
    pub z: i32,
}

impl RegionPos {
    /// Creates a region position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// On-disk file name for this region, e.g. `r.-1.3.wvr`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("r.{}.{}.wvr", self.x, self.z)
    }
}

/// Level of detail of a captured chunk.
///
/// Total order: `Lod < Full`. A record never overwrites a stored
/// record of strictly greater completeness; equal completeness
/// overwrites, so a re-observed chunk refreshes its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Completeness {
    /// Distant/low-detail data (received via LOD streaming).
    Lod = 0,
    /// Full-detail chunk data.
    Full = 1,
}

impl Completeness {
    /// Converts from the on-disk tag byte.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Lod),
            1 => Some(Self::Full),
            _ => None,
        }
    }
}

/// The serialized sections of a captured chunk.
///
/// Sections are opaque to the storage layer; the event source hands
/// them over already encoded. Block entities ride inside the chunk
/// record because they are keyed by block position, not by identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkPayload {
    /// Block state data.
    pub blocks: Vec<u8>,
    /// Biome data.
    pub biomes: Vec<u8>,
    /// Light data.
    pub light: Vec<u8>,
    /// Serialized block entities within the chunk.
    pub block_entities: Vec<u8>,
}

impl ChunkPayload {
    /// Serializes all sections with length prefixes.
    ///
    /// Format: 4x `[len: u32 LE][bytes]` in declaration order.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let total = 16
            + self.blocks.len()
            + self.biomes.len()
            + self.light.len()
            + self.block_entities.len();
        let mut buf = Vec::with_capacity(total);
        for section in [&self.blocks, &self.biomes, &self.light, &self.block_entities] {
            buf.extend_from_slice(&(section.len() as u32).to_le_bytes());
            buf.extend_from_slice(section);
        }
        buf
    }

    /// Deserializes a payload produced by [`ChunkPayload::serialize`].
    #[must_use]
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        let mut cursor = 0usize;
        let mut read_section = || -> Option<Vec<u8>> {
            let len_bytes: [u8; 4] = data.get(cursor..cursor + 4)?.try_into().ok()?;
            let len = u32::from_le_bytes(len_bytes) as usize;
            cursor += 4;
            let section = data.get(cursor..cursor + len)?.to_vec();
            cursor += len;
            Some(section)
        };

        Some(Self {
            blocks: read_section()?,
            biomes: read_section()?,
            light: read_section()?,
            block_entities: read_section()?,
        })
    }
}

/// A staged or stored chunk: position, completeness, payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Chunk position.
    pub pos: ChunkPos,
    /// Level of detail of this observation.
    pub completeness: Completeness,
    /// Serialized chunk sections.
    pub payload: ChunkPayload,
}

impl ChunkRecord {
    /// Creates a chunk record.
    #[must_use]
    pub const fn new(pos: ChunkPos, completeness: Completeness, payload: ChunkPayload) -> Self {
        Self {
            pos,
            completeness,
            payload,
        }
    }
}
