//! # Region Store
//!
//! Read-merge-write persistence over region files plus the entity
//! snapshot store.
//!
//! ## Write discipline
//!
//! Every flush serializes the merged image to a temporary file in the
//! target directory and atomically renames it over the destination.
//! A reader concurrently opening the archive sees either the old file
//! or the new one, never a torn write.
//!
//! ## Failure policy
//!
//! - An unreadable or corrupt existing region file is logged and
//!   treated as absent; the region is rewritten from the staged data.
//!   Prior capture data in that region is sacrificed rather than
//!   blocking the session.
//! - A transient I/O error is retried up to [`IO_RETRY_LIMIT`] times
//!   within the flush cycle, then the region's records are counted as
//!   failed and the flush moves on.

use crate::chunk::{ChunkPos, ChunkRecord, RegionPos};
use crate::error::{StorageError, StorageResult};
use crate::region::{MergeOutcome, RegionData};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Attempts per region file before its records count as failed.
const IO_RETRY_LIMIT: u32 = 3;

/// Magic bytes identifying the entity store.
const ENTITY_MAGIC: &[u8; 4] = b"WVEN";

/// Current entity store format version.
const ENTITY_VERSION: u32 = 1;

/// How incoming chunk data merges with stored data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Keep the most complete record per chunk (downgrades dropped).
    #[default]
    MergeKeepMostComplete,
    /// Always take the incoming record, completeness ignored.
    AlwaysOverwrite,
}

/// Counters for one flush cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Chunk records written to disk.
    pub written: u64,
    /// Chunk records dropped by the completeness merge rule.
    pub skipped: u64,
    /// Chunk records lost to I/O failures after retries.
    pub failed: u64,
    /// Region file bytes written.
    pub bytes_written: u64,
}

/// Latest observed state of one mobile entity.
#[derive(Clone, Debug, PartialEq)]
pub struct EntitySnapshot {
    /// Stable entity identity within the session.
    pub id: u64,
    /// Entity type identifier.
    pub kind: String,
    /// World position.
    pub position: [f64; 3],
    /// Serialized attribute blob (NBT-like, opaque).
    pub attributes: Vec<u8>,
}

impl EntitySnapshot {
    /// Serializes the snapshot body (the id lives in the entry header).
    #[must_use]
    fn serialize(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let mut buf = Vec::with_capacity(4 + kind.len() + 24 + 4 + self.attributes.len());
        buf.extend_from_slice(&(kind.len() as u32).to_le_bytes());
        buf.extend_from_slice(kind);
        for coord in self.position {
            buf.extend_from_slice(&coord.to_le_bytes());
        }
        buf.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.attributes);
        buf
    }

    /// Deserializes a snapshot body.
    fn deserialize(id: u64, data: &[u8]) -> Option<Self> {
        let kind_len = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?) as usize;
        let mut cursor = 4;
        let kind = String::from_utf8(data.get(cursor..cursor + kind_len)?.to_vec()).ok()?;
        cursor += kind_len;

        let mut position = [0f64; 3];
        for coord in &mut position {
            *coord = f64::from_le_bytes(data.get(cursor..cursor + 8)?.try_into().ok()?);
            cursor += 8;
        }

        let attr_len = u32::from_le_bytes(data.get(cursor..cursor + 4)?.try_into().ok()?) as usize;
        cursor += 4;
        let attributes = data.get(cursor..cursor + attr_len)?.to_vec();

        Some(Self {
            id,
            kind,
            position,
            attributes,
        })
    }
}

/// Merge-write layer over one archive directory.
///
/// Single-owner: all writes to an archive go through the one
/// persistence thread that owns this store.
pub struct RegionStore {
    root: PathBuf,
    region_dir: PathBuf,
}

impl RegionStore {
    /// Opens a store over `root`, creating the directory tree.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let region_dir = root.join("region");
        std::fs::create_dir_all(&region_dir)?;
        Ok(Self { root, region_dir })
    }

    /// Returns the archive root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the on-disk path for a region.
    #[must_use]
    pub fn region_path(&self, pos: RegionPos) -> PathBuf {
        self.region_dir.join(pos.file_name())
    }

    /// Merges a batch of chunk records into the archive.
    ///
    /// Records are grouped by region so each region file is read and
    /// rewritten once per cycle. Failures are contained per region and
    /// reported through the returned [`FlushReport`].
    pub fn flush(&mut self, records: Vec<ChunkRecord>, policy: OverwritePolicy) -> FlushReport {
        let mut by_region: HashMap<RegionPos, Vec<ChunkRecord>> = HashMap::new();
        for record in records {
            by_region.entry(record.pos.region()).or_default().push(record);
        }

        let mut report = FlushReport::default();
        for (pos, batch) in by_region {
            let batch_len = batch.len() as u64;
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.flush_region(pos, &batch, policy) {
                    Ok((written, skipped, bytes)) => {
                        report.written += written;
                        report.skipped += skipped;
                        report.bytes_written += bytes;
                        break;
                    }
                    Err(e) if attempt < IO_RETRY_LIMIT => {
                        tracing::warn!(
                            region = %pos.file_name(),
                            attempt,
                            "region flush failed, retrying: {e}"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            region = %pos.file_name(),
                            "region flush failed after {attempt} attempts, \
                             {batch_len} records lost this cycle: {e}"
                        );
                        report.failed += batch_len;
                        break;
                    }
                }
            }
        }
        report
    }

    /// Reads one region, merges the batch, writes it back atomically.
    fn flush_region(
        &self,
        pos: RegionPos,
        batch: &[ChunkRecord],
        policy: OverwritePolicy,
    ) -> StorageResult<(u64, u64, u64)> {
        let mut region = self.load_or_empty(pos);
        let keep_most_complete = policy == OverwritePolicy::MergeKeepMostComplete;

        let mut written = 0u64;
        let mut skipped = 0u64;
        for record in batch {
            match region.merge(record, keep_most_complete) {
                MergeOutcome::Written => written += 1,
                MergeOutcome::Skipped => skipped += 1,
            }
        }

        let bytes = self.persist_atomically(&self.region_path(pos), |w| region.write_to(w))?;
        Ok((written, skipped, bytes))
    }

    /// Loads an existing region image, or an empty one.
    ///
    /// A missing file is the normal first-write case. An unreadable or
    /// structurally invalid file is logged and treated as absent.
    fn load_or_empty(&self, pos: RegionPos) -> RegionData {
        let path = self.region_path(pos);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return RegionData::empty(pos);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "region unreadable, rewriting: {e}");
                return RegionData::empty(pos);
            }
        };
        match RegionData::read_from(&mut file, pos, &path) {
            Ok(region) => region,
            Err(e) => {
                tracing::warn!(path = %path.display(), "corrupt region, rewriting: {e}");
                RegionData::empty(pos)
            }
        }
    }

    /// Reads a chunk record straight from the archive.
    ///
    /// Tooling/inspection path; the capture engine itself never reads
    /// chunks back during a session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptRegion`] if the region file
    /// fails structural validation.
    pub fn read_chunk(&self, pos: ChunkPos) -> StorageResult<Option<ChunkRecord>> {
        let region_pos = pos.region();
        let path = self.region_path(region_pos);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        RegionData::read_from(&mut file, region_pos, &path)?.get(pos)
    }

    /// Merges entity snapshots into the entity store (last write wins
    /// per entity id) and returns the number of snapshots applied.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store cannot be rewritten. A
    /// corrupt existing store is logged and rebuilt from the incoming
    /// snapshots.
    pub fn flush_entities(&mut self, snapshots: Vec<EntitySnapshot>) -> StorageResult<usize> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut merged = match self.read_entities() {
            Ok(existing) => existing
                .into_iter()
                .map(|s| (s.id, s))
                .collect::<BTreeMap<_, _>>(),
            Err(e) => {
                tracing::warn!("corrupt entity store, rebuilding: {e}");
                BTreeMap::new()
            }
        };

        let applied = snapshots.len();
        for snapshot in snapshots {
            merged.insert(snapshot.id, snapshot);
        }

        self.persist_atomically(&self.entity_path(), |w| {
            w.write_all(ENTITY_MAGIC)?;
            w.write_all(&ENTITY_VERSION.to_le_bytes())?;
            w.write_all(&(merged.len() as u32).to_le_bytes())?;
            for snapshot in merged.values() {
                let compressed = compress_prepend_size(&snapshot.serialize());
                w.write_all(&snapshot.id.to_le_bytes())?;
                w.write_all(&(compressed.len() as u32).to_le_bytes())?;
                w.write_all(&crc32fast::hash(&compressed).to_le_bytes())?;
                w.write_all(&compressed)?;
            }
            Ok(())
        })?;
        Ok(applied)
    }

    /// Reads all entity snapshots from the archive.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptEntityStore`] on structural
    /// violations.
    pub fn read_entities(&self) -> StorageResult<Vec<EntitySnapshot>> {
        let corrupt = |reason: String| StorageError::CorruptEntityStore { reason };

        let mut data = Vec::new();
        match File::open(self.entity_path()) {
            Ok(mut f) => {
                f.read_to_end(&mut data)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        if data.len() < 12 {
            return Err(corrupt("file too short".to_string()));
        }
        if &data[0..4] != ENTITY_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != ENTITY_VERSION {
            return Err(corrupt(format!("unsupported version {version}")));
        }
        let count = u32::from_le_bytes(data[8..12].try_into().expect("4 bytes")) as usize;

        let mut snapshots = Vec::with_capacity(count);
        let mut cursor = 12usize;
        for i in 0..count {
            let header = data
                .get(cursor..cursor + 16)
                .ok_or_else(|| corrupt(format!("entry {i}: truncated header")))?;
            let id = u64::from_le_bytes(header[0..8].try_into().expect("8 bytes"));
            let len = u32::from_le_bytes(header[8..12].try_into().expect("4 bytes")) as usize;
            let stored_crc = u32::from_le_bytes(header[12..16].try_into().expect("4 bytes"));
            cursor += 16;

            let compressed = data
                .get(cursor..cursor + len)
                .ok_or_else(|| corrupt(format!("entry {i}: truncated payload")))?;
            cursor += len;
            if crc32fast::hash(compressed) != stored_crc {
                return Err(corrupt(format!("entry {i}: CRC mismatch")));
            }
            let raw = decompress_size_prepended(compressed)
                .map_err(|e| corrupt(format!("entry {i}: decompression failed: {e}")))?;
            let snapshot = EntitySnapshot::deserialize(id, &raw)
                .ok_or_else(|| corrupt(format!("entry {i}: malformed snapshot")))?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Path of the entity store file.
    #[must_use]
    pub fn entity_path(&self) -> PathBuf {
        self.root.join("entities.wve")
    }

    /// Writes via a temp file in the destination directory, fsyncs,
    /// then atomically renames over the destination.
    fn persist_atomically<F>(&self, dest: &Path, write: F) -> StorageResult<u64>
    where
        F: FnOnce(&mut File) -> StorageResult<()>,
    {
        let dir = dest.parent().unwrap_or(&self.root);
        let mut temp = NamedTempFile::new_in(dir)?;
        write(temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        let bytes = temp.as_file().metadata()?.len();
        temp.persist(dest).map_err(|e| StorageError::Io(e.error))?;
        Ok(bytes)
    }
}
