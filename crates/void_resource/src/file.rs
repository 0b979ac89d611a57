//! Resource files - persisted blobs with a table of contents
//!
//! # Layout
//!
//! ```text
//! +--------+---------+------------+---------+------------------+-----+
//! | "VRES" | version | toc_offset | toc_len | data section ... | TOC |
//! |  4 B   |  u32 LE |   u64 LE   |  u64 LE |                  |     |
//! +--------+---------+------------+---------+------------------+-----+
//! ```
//!
//! The TOC is a bincode-encoded list of [`TocEntry`] and can be read without
//! touching any blob bytes. Each blob is stored either raw or as an LZ4 block.
//! Writes go to a temporary file that is renamed into place.

use crate::blob::Blob;
use crate::hash::{ContentHash, ResourceKind};
use crate::{ResourceError, ResourceResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAGIC: [u8; 4] = *b"VRES";
const HEADER_SIZE: u64 = 4 + 4 + 8 + 8;

/// Current resource file format version
pub const FORMAT_VERSION: u32 = 1;

/// One table-of-contents record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Content hash of the decompressed bytes
    pub hash: ContentHash,
    /// Resource kind
    pub kind: ResourceKind,
    /// Display name
    pub name: String,
    /// Absolute offset of the stored bytes
    pub offset: u64,
    /// Stored size when compressed, 0 when stored raw
    pub compressed_size: u32,
    /// Size of the decompressed bytes
    pub decompressed_size: u32,
}

impl TocEntry {
    /// Number of bytes occupied in the data section
    pub fn stored_size(&self) -> u64 {
        if self.compressed_size > 0 {
            self.compressed_size as u64
        } else {
            self.decompressed_size as u64
        }
    }

    /// Whether the stored bytes are LZ4 compressed
    pub fn is_compressed(&self) -> bool {
        self.compressed_size > 0
    }
}

/// An opened resource file
///
/// Only the TOC is read on open; blobs are loaded on demand.
pub struct ResourceFile {
    path: PathBuf,
    toc: HashMap<ContentHash, TocEntry>,
    file: Mutex<File>,
}

impl ResourceFile {
    /// Open a resource file and read its table of contents
    pub fn open(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        if file_len < HEADER_SIZE {
            return Err(ResourceError::Decode(format!(
                "{}: file too small for header ({} bytes)",
                path.display(),
                file_len
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if header[0..4] != MAGIC {
            return Err(ResourceError::Decode(format!("{}: bad magic", path.display())));
        }

        let version = read_u32(&header[4..8]);
        if version != FORMAT_VERSION {
            return Err(ResourceError::Decode(format!(
                "{}: unsupported format version {} (expected {})",
                path.display(),
                version,
                FORMAT_VERSION
            )));
        }

        let toc_offset = read_u64(&header[8..16]);
        let toc_len = read_u64(&header[16..24]);
        let toc_end = toc_offset.checked_add(toc_len);
        if toc_offset < HEADER_SIZE || toc_end.map_or(true, |end| end > file_len) {
            return Err(ResourceError::Decode(format!(
                "{}: TOC range {}+{} outside file of {} bytes",
                path.display(),
                toc_offset,
                toc_len,
                file_len
            )));
        }

        file.seek(SeekFrom::Start(toc_offset))?;
        let mut toc_bytes = vec![0u8; toc_len as usize];
        file.read_exact(&mut toc_bytes)?;
        let entries: Vec<TocEntry> = bincode::deserialize(&toc_bytes)?;

        let mut toc = HashMap::with_capacity(entries.len());
        for entry in entries {
            let end = entry.offset.checked_add(entry.stored_size());
            if entry.offset < HEADER_SIZE || end.map_or(true, |end| end > toc_offset) {
                return Err(ResourceError::Decode(format!(
                    "{}: entry {} points outside the data section",
                    path.display(),
                    entry.hash
                )));
            }
            toc.insert(entry.hash, entry);
        }

        log::debug!("Opened resource file {} ({} entries)", path.display(), toc.len());

        Ok(Self {
            path,
            toc,
            file: Mutex::new(file),
        })
    }

    /// Path this file was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the TOC lists a hash
    pub fn contains(&self, hash: ContentHash) -> bool {
        self.toc.contains_key(&hash)
    }

    /// TOC record for a hash
    pub fn entry(&self, hash: ContentHash) -> Option<&TocEntry> {
        self.toc.get(&hash)
    }

    /// All TOC records
    pub fn entries(&self) -> impl Iterator<Item = &TocEntry> {
        self.toc.values()
    }

    /// Number of resources in the file
    pub fn len(&self) -> usize {
        self.toc.len()
    }

    /// Check if the file lists no resources
    pub fn is_empty(&self) -> bool {
        self.toc.is_empty()
    }

    /// Load and verify one blob
    pub fn load(&self, hash: ContentHash) -> ResourceResult<Blob> {
        let entry = self.toc.get(&hash).ok_or(ResourceError::NotFound(hash))?;

        let mut stored = vec![0u8; entry.stored_size() as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut stored)?;
        }

        let blob = if entry.is_compressed() {
            Blob::from_compressed(
                entry.kind,
                entry.name.clone(),
                stored,
                entry.decompressed_size as usize,
            )?
        } else {
            Blob::new(entry.kind, entry.name.clone(), stored)
        };

        if blob.hash() != hash {
            return Err(ResourceError::Decode(format!(
                "{}: content of {} hashes to {}",
                self.path.display(),
                hash,
                blob.hash()
            )));
        }

        Ok(blob)
    }
}

impl std::fmt::Debug for ResourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFile")
            .field("path", &self.path)
            .field("entries", &self.toc.len())
            .finish()
    }
}

/// Writes blobs into a resource file
#[derive(Default)]
pub struct ResourceFileWriter {
    blobs: Vec<Arc<Blob>>,
    compression_threshold: Option<usize>,
}

impl ResourceFileWriter {
    /// Create a writer that stores blobs raw
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress blobs of at least `threshold` bytes
    pub fn with_compression(mut self, threshold: usize) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }

    /// Add a blob; duplicates by hash are ignored
    pub fn add(&mut self, blob: Arc<Blob>) -> &mut Self {
        if !self.blobs.iter().any(|b| b.hash() == blob.hash()) {
            self.blobs.push(blob);
        }
        self
    }

    /// Number of blobs queued
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Check if nothing has been added
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Write the file atomically, returning its TOC
    pub fn write(&self, path: impl AsRef<Path>) -> ResourceResult<Vec<TocEntry>> {
        let path = path.as_ref();
        let temp_path = path.with_extension("tmp");

        let mut toc = Vec::with_capacity(self.blobs.len());
        let mut offset = HEADER_SIZE;
        let mut data = Vec::new();

        for blob in &self.blobs {
            let size = u32::try_from(blob.decompressed_size()).map_err(|_| {
                ResourceError::Serialization(format!("{} exceeds 4 GiB", blob.hash()))
            })?;

            let compress = self
                .compression_threshold
                .is_some_and(|threshold| blob.decompressed_size() >= threshold);
            let compressed = if compress { Some(blob.compress()) } else { None };
            let (stored, compressed_size) = match compressed {
                // Incompressible data is stored raw
                Some(bytes) if bytes.len() < blob.decompressed_size() => (bytes, bytes.len() as u32),
                _ => (blob.data(), 0),
            };

            toc.push(TocEntry {
                hash: blob.hash(),
                kind: blob.kind(),
                name: blob.name().to_string(),
                offset,
                compressed_size,
                decompressed_size: size,
            });
            data.extend_from_slice(stored);
            offset += stored.len() as u64;
        }

        let toc_bytes = bincode::serialize(&toc)?;

        {
            let mut out = BufWriter::new(File::create(&temp_path)?);
            out.write_all(&MAGIC)?;
            out.write_all(&FORMAT_VERSION.to_le_bytes())?;
            out.write_all(&offset.to_le_bytes())?;
            out.write_all(&(toc_bytes.len() as u64).to_le_bytes())?;
            out.write_all(&data)?;
            out.write_all(&toc_bytes)?;
            out.flush()?;
        }
        fs::rename(&temp_path, path)?;

        log::info!("Wrote resource file {} ({} resources)", path.display(), toc.len());
        Ok(toc)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blobs() -> Vec<Arc<Blob>> {
        vec![
            Arc::new(Blob::new(ResourceKind::GeometryArray, "positions", vec![1, 2, 3])),
            Arc::new(Blob::new(ResourceKind::Texture2D, "albedo", vec![0x55; 8192])),
        ]
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.vres");

        let mut writer = ResourceFileWriter::new().with_compression(1024);
        for blob in sample_blobs() {
            writer.add(blob);
        }
        let toc = writer.write(&path).unwrap();
        assert_eq!(toc.len(), 2);
        assert!(!toc[0].is_compressed());
        assert!(toc[1].is_compressed());

        let file = ResourceFile::open(&path).unwrap();
        assert_eq!(file.len(), 2);

        for blob in sample_blobs() {
            let loaded = file.load(blob.hash()).unwrap();
            assert_eq!(loaded, *blob);
            assert_eq!(loaded.name(), blob.name());
        }
    }

    #[test]
    fn test_writer_dedups() {
        let blob = Arc::new(Blob::new(ResourceKind::GeometryArray, "a", vec![1]));
        let mut writer = ResourceFileWriter::new();
        writer.add(blob.clone()).add(blob);
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vres");
        fs::write(&path, [0u8; 64]).unwrap();

        assert!(matches!(ResourceFile::open(&path), Err(ResourceError::Decode(_))));
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.vres");

        let mut writer = ResourceFileWriter::new();
        for blob in sample_blobs() {
            writer.add(blob);
        }
        writer.write(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(ResourceFile::open(&path).is_err());
    }

    #[test]
    fn test_load_detects_corrupt_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.vres");
        let blob = Arc::new(Blob::new(ResourceKind::GeometryArray, "positions", vec![1, 2, 3]));

        let mut writer = ResourceFileWriter::new();
        writer.add(blob.clone());
        let toc = writer.write(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[toc[0].offset as usize] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let file = ResourceFile::open(&path).unwrap();
        assert!(matches!(file.load(blob.hash()), Err(ResourceError::Decode(_))));
    }

    #[test]
    fn test_load_unknown_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.vres");
        ResourceFileWriter::new().write(&path).unwrap();

        let file = ResourceFile::open(&path).unwrap();
        assert!(file.is_empty());
        assert!(matches!(
            file.load(ContentHash::new(1, 2)),
            Err(ResourceError::NotFound(_))
        ));
    }
}
