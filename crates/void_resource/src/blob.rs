//! Blobs - immutable resource payloads
//!
//! A blob never changes after creation. Any edit produces a new blob with a
//! new hash. The only lazily filled part is the cached LZ4 form, which is a
//! pure function of the bytes.

use crate::hash::{ContentHash, ResourceKind};
use crate::{ResourceError, ResourceResult};
use std::fmt;
use std::sync::OnceLock;

/// Immutable resource payload
pub struct Blob {
    hash: ContentHash,
    kind: ResourceKind,
    name: String,
    data: Vec<u8>,
    compressed: OnceLock<Vec<u8>>,
}

impl Blob {
    /// Create a blob, computing its content hash
    pub fn new(kind: ResourceKind, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            hash: ContentHash::compute(kind, &data),
            kind,
            name: name.into(),
            data,
            compressed: OnceLock::new(),
        }
    }

    /// Rebuild a blob from its LZ4 block form
    ///
    /// The compressed bytes are kept so forwarding the blob does not
    /// recompress it.
    pub fn from_compressed(
        kind: ResourceKind,
        name: impl Into<String>,
        compressed: Vec<u8>,
        decompressed_size: usize,
    ) -> ResourceResult<Self> {
        let data = lz4_flex::decompress(&compressed, decompressed_size)
            .map_err(|e| ResourceError::Decode(format!("LZ4 decompression failed: {}", e)))?;

        if data.len() != decompressed_size {
            return Err(ResourceError::Decode(format!(
                "Decompressed size mismatch: expected {}, got {}",
                decompressed_size,
                data.len()
            )));
        }

        let blob = Self::new(kind, name, data);
        let _ = blob.compressed.set(compressed);
        Ok(blob)
    }

    /// Content hash
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Uncompressed size in bytes
    pub fn decompressed_size(&self) -> usize {
        self.data.len()
    }

    /// Compressed size, if a compressed form has been computed
    pub fn compressed_size(&self) -> Option<usize> {
        self.compressed.get().map(|c| c.len())
    }

    /// Cached compressed form, if any
    pub fn compressed(&self) -> Option<&[u8]> {
        self.compressed.get().map(|c| c.as_slice())
    }

    /// Compress once and cache the result
    pub fn compress(&self) -> &[u8] {
        self.compressed
            .get_or_init(|| lz4_flex::compress(&self.data))
            .as_slice()
    }

    /// Check the bytes still match the hash
    pub fn verify(&self) -> bool {
        ContentHash::compute(self.kind, &self.data) == self.hash
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.kind == other.kind && self.data == other.data
    }
}

impl Eq for Blob {}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("hash", &self.hash)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("size", &self.data.len())
            .field("compressed_size", &self.compressed_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_hash_matches_contents() {
        let blob = Blob::new(ResourceKind::Texture2D, "checker", vec![0xAA; 64]);
        assert_eq!(blob.hash(), ContentHash::compute(ResourceKind::Texture2D, &[0xAA; 64]));
        assert_eq!(blob.decompressed_size(), 64);
        assert!(blob.verify());
    }

    #[test]
    fn test_compress_is_cached() {
        let blob = Blob::new(ResourceKind::GeometryArray, "quad", vec![7; 4096]);
        assert!(blob.compressed().is_none());

        let first = blob.compress().as_ptr();
        let second = blob.compress().as_ptr();
        assert_eq!(first, second);
        assert!(blob.compressed_size().unwrap() < 4096);
    }

    #[test]
    fn test_from_compressed_restores_bytes() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 17) as u8).collect();
        let compressed = lz4_flex::compress(&data);

        let blob = Blob::from_compressed(ResourceKind::CompiledEffect, "fx", compressed, data.len())
            .unwrap();
        assert_eq!(blob.data(), data.as_slice());
        assert!(blob.compressed().is_some());
    }

    #[test]
    fn test_from_compressed_rejects_garbage() {
        let result = Blob::from_compressed(ResourceKind::Texture2D, "bad", vec![0xFF, 0x00, 0x13], 100);
        assert!(matches!(result, Err(ResourceError::Decode(_))));
    }
}
