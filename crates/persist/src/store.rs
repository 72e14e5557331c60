//! File-backed quad storage.
//!
//! Layout inside the save root:
//! ```text
//! world.meta.json             - metadata and schema versions
//! maps/
//!   primary/
//!     0.0.0.quad              - one file per quad of the primary dimension
//!   dim_<escaped name>/       - bytes outside [A-Za-z0-9-] written as _xx
//!     -1.3.0.quad
//! ```
//!
//! A quad file is `MSQ1` magic, the SHA-256 of the body, then the body:
//! a zstd-compressed CBOR array of [`SubmapRecord`]s.

use mapstream_common::{AreaPos, DimensionId, SubmapPos};
use mapstream_kernel::{Submap, SubmapError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::PersistConfig;

/// Current schema versions.
pub const QUAD_SCHEMA_VERSION: u32 = 1;
pub const SUBMAP_FORMAT_VERSION: u32 = 1;

const QUAD_MAGIC: &[u8; 4] = b"MSQ1";
const DIGEST_LEN: usize = 32;

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("not a quad file")]
    BadMagic,
    #[error("invalid submap payload: {0}")]
    InvalidSubmap(#[from] SubmapError),
}

/// Metadata stored in world.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMeta {
    pub quad_schema_version: u32,
    pub submap_format_version: u32,
}

/// One submap inside a quad file: a format version, the explicit coordinate
/// and the submap's own payload.
///
/// Writers use `SubmapRecord<&Submap>` to avoid cloning resident submaps;
/// both forms encode identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmapRecord<S = Submap> {
    pub version: u32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub submap: S,
}

impl<S> SubmapRecord<S> {
    pub fn new(pos: SubmapPos, submap: S) -> Self {
        Self {
            version: SUBMAP_FORMAT_VERSION,
            x: pos.x,
            y: pos.y,
            z: pos.z,
            submap,
        }
    }

    pub fn pos(&self) -> SubmapPos {
        SubmapPos::new(self.x, self.y, self.z)
    }
}

/// The save-file backend: reads and writes whole quads.
///
/// Implementations are shared by every chunk store and called from worker
/// threads during a save.
pub trait QuadBackend: Send + Sync {
    fn write_quad(
        &self,
        dim: &DimensionId,
        area: AreaPos,
        records: &[SubmapRecord<&Submap>],
    ) -> Result<(), StoreError>;

    /// `Ok(None)` when no file exists for the quad.
    fn read_quad(
        &self,
        dim: &DimensionId,
        area: AreaPos,
    ) -> Result<Option<Vec<SubmapRecord>>, StoreError>;
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub quads_written: u64,
    pub quads_read: u64,
}

/// File-backed quad store with schema versioning and integrity checking.
pub struct QuadFileStore {
    root: PathBuf,
    meta: WorldMeta,
    compression_level: i32,
    verify_checksums: bool,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl QuadFileStore {
    /// Open or create a quad store at `config.root`.
    pub fn open(config: &PersistConfig) -> Result<Self, StoreError> {
        let root = config.root.clone();
        std::fs::create_dir_all(root.join("maps"))?;

        let meta_path = root.join("world.meta.json");
        let meta = if meta_path.exists() {
            let meta: WorldMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.quad_schema_version != QUAD_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.quad_schema_version,
                    expected_version: QUAD_SCHEMA_VERSION,
                });
            }
            meta
        } else {
            let meta = WorldMeta {
                quad_schema_version: QUAD_SCHEMA_VERSION,
                submap_format_version: SUBMAP_FORMAT_VERSION,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            meta
        };

        tracing::debug!(root = %root.display(), "opened quad store");
        Ok(Self {
            root,
            meta,
            compression_level: config.compression_level,
            verify_checksums: config.verify_checksums,
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the metadata.
    pub fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            quads_written: self.writes.load(Ordering::Relaxed),
            quads_read: self.reads.load(Ordering::Relaxed),
        }
    }

    pub fn dimension_dir(&self, dim: &DimensionId) -> PathBuf {
        self.root.join("maps").join(dim.dir_name())
    }

    pub fn quad_path(&self, dim: &DimensionId, area: AreaPos) -> PathBuf {
        self.dimension_dir(dim)
            .join(format!("{}.{}.{}.quad", area.x, area.y, area.z))
    }

    /// Number of quad files stored for a dimension.
    pub fn quad_file_count(&self, dim: &DimensionId) -> Result<usize, StoreError> {
        let dir = self.dimension_dir(dim);
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            if entry?.path().extension().is_some_and(|e| e == "quad") {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl QuadBackend for QuadFileStore {
    fn write_quad(
        &self,
        dim: &DimensionId,
        area: AreaPos,
        records: &[SubmapRecord<&Submap>],
    ) -> Result<(), StoreError> {
        let body = zstd_compress(&cbor_serialize(records)?, self.compression_level)?;
        let digest = Sha256::digest(&body);

        let path = self.quad_path(dim, area);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename so a crash never leaves half a quad.
        let tmp = path.with_extension("quad.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(QUAD_MAGIC)?;
            file.write_all(&digest)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%dim, %area, submaps = records.len(), "wrote quad");
        Ok(())
    }

    fn read_quad(
        &self,
        dim: &DimensionId,
        area: AreaPos,
    ) -> Result<Option<Vec<SubmapRecord>>, StoreError> {
        let path = self.quad_path(dim, area);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.reads.fetch_add(1, Ordering::Relaxed);

        let header = QUAD_MAGIC.len() + DIGEST_LEN;
        if data.len() < header || &data[..QUAD_MAGIC.len()] != QUAD_MAGIC {
            return Err(StoreError::BadMagic);
        }
        let (expected, body) = data[QUAD_MAGIC.len()..].split_at(DIGEST_LEN);
        if self.verify_checksums {
            let actual = Sha256::digest(body);
            if actual.as_slice() != expected {
                return Err(StoreError::IntegrityMismatch {
                    expected: hex(expected),
                    actual: hex(&actual),
                });
            }
        }

        let records: Vec<SubmapRecord> = cbor_deserialize(&zstd_decompress(body)?)?;
        for record in &records {
            record.submap.validate()?;
        }
        Ok(Some(records))
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
