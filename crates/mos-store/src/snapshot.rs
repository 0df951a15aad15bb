//! Snapshot files for [`MemoryKvStore`].
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "MOSS"]
//! [4 bytes: format version (little-endian u32)]
//! [8 bytes: payload length (little-endian u64)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (zstd-compressed bincode of every table)]
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::memory::{MemoryKvStore, Tables};

const MAGIC: &[u8; 4] = b"MOSS";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;

impl MemoryKvStore {
    /// Write every committed table to `path`. Returns the number of entries
    /// written.
    pub fn save_snapshot(&self, path: &Path) -> StoreResult<usize> {
        let tables = self.export_tables();
        let entries: usize = tables.values().map(|t| t.len()).sum();
        let payload =
            bincode::serialize(&tables).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(payload.as_slice(), 3)?;
        let crc = crc32fast::hash(&compressed);

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(MAGIC)?;
        tmp.write_all(&VERSION.to_le_bytes())?;
        tmp.write_all(&(compressed.len() as u64).to_le_bytes())?;
        tmp.write_all(&crc.to_le_bytes())?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

        debug!(
            path = %path.display(),
            tables = tables.len(),
            entries,
            bytes = compressed.len(),
            "snapshot saved"
        );
        Ok(entries)
    }

    /// Load a store from a snapshot written by [`MemoryKvStore::save_snapshot`].
    pub fn open_snapshot(path: &Path) -> StoreResult<Self> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE {
            return Err(StoreError::CorruptSnapshot(format!(
                "file is {} bytes, shorter than the {HEADER_SIZE}-byte header",
                data.len()
            )));
        }
        if &data[..4] != MAGIC {
            return Err(StoreError::CorruptSnapshot("bad magic".into()));
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != VERSION {
            return Err(StoreError::CorruptSnapshot(format!(
                "unsupported version {version}"
            )));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[8..16]);
        let length = u64::from_le_bytes(len_bytes) as usize;
        let expected_crc = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);

        let payload = data.get(HEADER_SIZE..HEADER_SIZE + length).ok_or_else(|| {
            StoreError::CorruptSnapshot(format!(
                "payload truncated: header claims {length} bytes, file has {}",
                data.len() - HEADER_SIZE
            ))
        })?;
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            return Err(StoreError::CorruptSnapshot(format!(
                "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
            )));
        }

        let raw = zstd::decode_all(payload)
            .map_err(|e| StoreError::CorruptSnapshot(format!("decompression failed: {e}")))?;
        let tables: Tables =
            bincode::deserialize(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;

        debug!(path = %path.display(), tables = tables.len(), "snapshot opened");
        Ok(MemoryKvStore::from_tables(tables))
    }

    /// Open the snapshot at `path`, or start empty if none exists yet.
    pub fn open_or_create(path: &Path) -> StoreResult<Self> {
        if path.exists() {
            Self::open_snapshot(path)
        } else {
            Ok(MemoryKvStore::new())
        }
    }
}
