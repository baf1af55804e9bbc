//! # Region File Format
//!
//! A region file covers a fixed 32x32 grid of chunks.
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "WVRG"]
//! [4 bytes: format version (u32 LE)]
//! [4 bytes: region x (i32 LE)]
//! [4 bytes: region z (i32 LE)]
//! [8192 bytes: slot table, 1024 x { offset u32 LE, len u32 LE }]
//!
//! Entry format (at the table offset, absolute from file start):
//! [1 byte: completeness tag]
//! [4 bytes: CRC32 of the compressed payload]
//! [N bytes: LZ4-compressed chunk payload, size-prepended]
//! ```
//!
//! An offset of zero marks an empty slot. Payload entries are packed
//! in slot-index order, which makes serialization deterministic:
//! the same logical region always produces byte-identical files.
//!
//! [`RegionData::read_from`] validates the full structure (magic,
//! version, table bounds, per-entry CRC) and therefore doubles as the
//! archive's structural validator.

use crate::chunk::{ChunkPayload, ChunkPos, ChunkRecord, Completeness, RegionPos};
use crate::error::{StorageError, StorageResult};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::io::{Read, Write};
use std::path::Path;

/// Chunks per region edge.
pub const REGION_SPAN: usize = 32;

/// Chunk slots per region file.
pub const SLOTS_PER_REGION: usize = REGION_SPAN * REGION_SPAN;

/// Magic bytes identifying a region file.
const REGION_MAGIC: &[u8; 4] = b"WVRG";

/// Current region format version.
const REGION_VERSION: u32 = 1;

/// Header length: magic + version + region x + region z.
const HEADER_LEN: usize = 16;

/// Slot table length: 1024 entries x 8 bytes.
const TABLE_LEN: usize = SLOTS_PER_REGION * 8;

/// A chunk as stored inside a region: completeness tag plus the
/// compressed payload exactly as it sits on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
struct StoredChunk {
    completeness: Completeness,
    compressed: Vec<u8>,
}

/// Outcome of merging one record into a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MergeOutcome {
    /// The record was written into its slot.
    Written,
    /// The record was dropped: the slot holds more complete data.
    Skipped,
}

/// In-memory image of one region file.
///
/// The persistence worker reads the existing file (if any), merges
/// staged records into it, and writes the whole image back out.
#[derive(Clone, Debug)]
pub struct RegionData {
    pos: RegionPos,
    slots: Vec<Option<StoredChunk>>,
}

impl RegionData {
    /// Creates an empty region image.
    #[must_use]
    pub fn empty(pos: RegionPos) -> Self {
        Self {
            pos,
            slots: vec![None; SLOTS_PER_REGION],
        }
    }

    /// Returns the region position.
    #[must_use]
    pub const fn pos(&self) -> RegionPos {
        self.pos
    }

    /// Returns the number of occupied chunk slots.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns the stored completeness for a chunk, if present.
    #[must_use]
    pub fn completeness_of(&self, pos: ChunkPos) -> Option<Completeness> {
        debug_assert_eq!(pos.region(), self.pos);
        self.slots[pos.region_index()]
            .as_ref()
            .map(|s| s.completeness)
    }

    /// Reads back a stored chunk record, decompressing its payload.
    ///
    /// Returns `None` for an empty slot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptRegion`] if the stored payload
    /// fails to decompress or deserialize.
    pub fn get(&self, pos: ChunkPos) -> StorageResult<Option<ChunkRecord>> {
        debug_assert_eq!(pos.region(), self.pos);
        let Some(stored) = &self.slots[pos.region_index()] else {
            return Ok(None);
        };
        let raw = decompress_size_prepended(&stored.compressed).map_err(|e| {
            StorageError::CorruptRegion {
                path: self.pos.file_name().into(),
                reason: format!("decompression failed: {e}"),
            }
        })?;
        let payload =
            ChunkPayload::deserialize(&raw).ok_or_else(|| StorageError::CorruptRegion {
                path: self.pos.file_name().into(),
                reason: "payload sections truncated".to_string(),
            })?;
        Ok(Some(ChunkRecord::new(pos, stored.completeness, payload)))
    }

    /// Merges one record into its slot.
    ///
    /// With `keep_most_complete` the record only replaces the slot if
    /// its completeness is >= the stored completeness; otherwise it is
    /// dropped and `Skipped` is returned.
    pub(crate) fn merge(&mut self, record: &ChunkRecord, keep_most_complete: bool) -> MergeOutcome {
        debug_assert_eq!(record.pos.region(), self.pos);
        let idx = record.pos.region_index();

        if keep_most_complete {
            if let Some(existing) = &self.slots[idx] {
                if record.completeness < existing.completeness {
                    return MergeOutcome::Skipped;
                }
            }
        }

        let compressed = compress_prepend_size(&record.payload.serialize());
        self.slots[idx] = Some(StoredChunk {
            completeness: record.completeness,
            compressed,
        });
        MergeOutcome::Written
    }

    /// Serializes the region to its on-disk form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PayloadTooLarge`] if a compressed entry
    /// cannot be addressed by the slot table, or an I/O error from the
    /// writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> StorageResult<()> {
        writer.write_all(REGION_MAGIC)?;
        writer.write_all(&REGION_VERSION.to_le_bytes())?;
        writer.write_all(&self.pos.x.to_le_bytes())?;
        writer.write_all(&self.pos.z.to_le_bytes())?;

        // Build the table first: payloads are packed in slot order
        // directly after it.
        let mut table = Vec::with_capacity(TABLE_LEN);
        let mut offset = (HEADER_LEN + TABLE_LEN) as u64;
        for slot in &self.slots {
            match slot {
                Some(stored) => {
                    let len = 1 + 4 + stored.compressed.len();
                    if len > u32::MAX as usize || offset + len as u64 > u64::from(u32::MAX) {
                        return Err(StorageError::PayloadTooLarge { len });
                    }
                    table.extend_from_slice(&(offset as u32).to_le_bytes());
                    table.extend_from_slice(&(len as u32).to_le_bytes());
                    offset += len as u64;
                }
                None => {
                    table.extend_from_slice(&0u32.to_le_bytes());
                    table.extend_from_slice(&0u32.to_le_bytes());
                }
            }
        }
        writer.write_all(&table)?;

        for stored in self.slots.iter().flatten() {
            writer.write_all(&[stored.completeness as u8])?;
            writer.write_all(&crc32fast::hash(&stored.compressed).to_le_bytes())?;
            writer.write_all(&stored.compressed)?;
        }
        Ok(())
    }

    /// Reads and structurally validates a region file.
    ///
    /// `path` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptRegion`] on any structural
    /// violation: bad magic, unsupported version, mismatched region
    /// coordinates, out-of-bounds table entries, or a CRC mismatch.
    pub fn read_from<R: Read>(reader: &mut R, pos: RegionPos, path: &Path) -> StorageResult<Self> {
        let corrupt = |reason: String| StorageError::CorruptRegion {
            path: path.to_path_buf(),
            reason,
        };

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if data.len() < HEADER_LEN + TABLE_LEN {
            return Err(corrupt(format!("file too short: {} bytes", data.len())));
        }
        if &data[0..4] != REGION_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != REGION_VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        let file_x = i32::from_le_bytes(data[8..12].try_into().expect("4 bytes"));
        let file_z = i32::from_le_bytes(data[12..16].try_into().expect("4 bytes"));
        if file_x != pos.x || file_z != pos.z {
            return Err(corrupt(format!(
                "region coordinate mismatch: file says ({file_x},{file_z})"
            )));
        }

        let mut slots: Vec<Option<StoredChunk>> = vec![None; SLOTS_PER_REGION];
        for (idx, slot) in slots.iter_mut().enumerate() {
            let entry = HEADER_LEN + idx * 8;
            let offset =
                u32::from_le_bytes(data[entry..entry + 4].try_into().expect("4 bytes")) as usize;
            let len =
                u32::from_le_bytes(data[entry + 4..entry + 8].try_into().expect("4 bytes")) as usize;
            if offset == 0 {
                continue;
            }
            if len < 5 {
                return Err(corrupt(format!("slot {idx}: entry shorter than header")));
            }
            let end = offset.checked_add(len).ok_or_else(|| {
                corrupt(format!("slot {idx}: offset overflow"))
            })?;
            if offset < HEADER_LEN + TABLE_LEN || end > data.len() {
                return Err(corrupt(format!(
                    "slot {idx}: entry [{offset}, {end}) outside file"
                )));
            }

            let completeness = Completeness::from_u8(data[offset])
                .ok_or_else(|| corrupt(format!("slot {idx}: bad completeness tag")))?;
            let stored_crc =
                u32::from_le_bytes(data[offset + 1..offset + 5].try_into().expect("4 bytes"));
            let compressed = data[offset + 5..end].to_vec();
            if crc32fast::hash(&compressed) != stored_crc {
                return Err(corrupt(format!("slot {idx}: CRC mismatch")));
            }

            *slot = Some(StoredChunk {
                completeness,
                compressed,
            });
        }

        Ok(Self { pos, slots })
    }
}
