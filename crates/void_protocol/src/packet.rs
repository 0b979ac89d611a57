//! Packet framing constants and block records

use serde::{Deserialize, Serialize};
use void_resource::{Blob, ContentHash, ResourceKind};

/// Size of the leading sequence number
pub const SEQUENCE_SIZE: usize = 4;

/// Size of the trailing flag
pub const TRAILER_SIZE: usize = 1;

/// Bytes of every packet not available to blocks
pub const PACKET_OVERHEAD: usize = SEQUENCE_SIZE + TRAILER_SIZE;

/// Size of a block header (tag + length)
pub const BLOCK_HEADER_SIZE: usize = 5;

/// Trailer value: more packets follow
pub const TRAILER_MORE: u8 = 0xFE;

/// Trailer value: last packet of the update
pub const TRAILER_LAST: u8 = 0xFF;

/// Largest ratio between decompressed and compressed resource size LZ4 can produce
const MAX_LZ4_RATIO: usize = 255;

/// Packet trailer flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailer {
    /// More packets follow
    More,
    /// Final packet of the update
    Last,
}

impl Trailer {
    /// Wire value
    pub const fn byte(self) -> u8 {
        match self {
            Self::More => TRAILER_MORE,
            Self::Last => TRAILER_LAST,
        }
    }

    /// Parse a wire value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TRAILER_MORE => Some(Self::More),
            TRAILER_LAST => Some(Self::Last),
            _ => None,
        }
    }

    /// Trailer of a raw packet, if it has a valid one
    pub fn of_packet(packet: &[u8]) -> Option<Self> {
        if packet.len() < PACKET_OVERHEAD {
            return None;
        }
        packet.last().copied().and_then(Self::from_byte)
    }
}

/// Block types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    /// Flush envelope
    FlushInfo = 0x01,
    /// Delta log
    Actions = 0x02,
    /// One resource record
    Resource = 0x03,
}

impl BlockKind {
    /// Wire tag
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::FlushInfo),
            0x02 => Some(Self::Actions),
            0x03 => Some(Self::Resource),
            _ => None,
        }
    }
}

/// Resource record as written into a block
#[derive(Serialize)]
pub(crate) struct WireResourceRef<'a> {
    pub hash: ContentHash,
    pub kind: ResourceKind,
    pub name: &'a str,
    pub decompressed_size: u64,
    pub compressed: bool,
    pub data: &'a [u8],
}

impl<'a> WireResourceRef<'a> {
    /// Record for a blob, using its cached compressed form when smaller
    pub fn from_blob(blob: &'a Blob) -> Self {
        let (compressed, data) = match blob.compressed() {
            Some(bytes) if bytes.len() < blob.decompressed_size() => (true, bytes),
            _ => (false, blob.data()),
        };
        Self {
            hash: blob.hash(),
            kind: blob.kind(),
            name: blob.name(),
            decompressed_size: blob.decompressed_size() as u64,
            compressed,
            data,
        }
    }
}

/// Resource record as read from a block
#[derive(Deserialize)]
pub(crate) struct WireResource {
    pub hash: ContentHash,
    pub kind: ResourceKind,
    pub name: String,
    pub decompressed_size: u64,
    pub compressed: bool,
    pub data: Vec<u8>,
}

impl WireResource {
    /// Rebuild the blob, checking size and hash
    pub fn into_blob(self) -> Result<Blob, String> {
        let size = usize::try_from(self.decompressed_size)
            .map_err(|_| format!("Resource {} size {} too large", self.hash, self.decompressed_size))?;

        let blob = if self.compressed {
            if size > self.data.len().saturating_mul(MAX_LZ4_RATIO).saturating_add(64) {
                return Err(format!(
                    "Resource {} declares implausible size {} for {} compressed bytes",
                    self.hash,
                    size,
                    self.data.len()
                ));
            }
            Blob::from_compressed(self.kind, self.name, self.data, size).map_err(|e| e.to_string())?
        } else {
            if self.data.len() != size {
                return Err(format!(
                    "Resource {} size mismatch: declared {}, got {}",
                    self.hash,
                    size,
                    self.data.len()
                ));
            }
            Blob::new(self.kind, self.name, self.data)
        };

        if blob.hash() != self.hash {
            return Err(format!("Resource hash mismatch: declared {}, computed {}", self.hash, blob.hash()));
        }
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailers_distinct_from_tags() {
        for trailer in [Trailer::More, Trailer::Last] {
            assert!(BlockKind::from_tag(trailer.byte()).is_none());
        }
        assert_eq!(BlockKind::from_tag(0x02), Some(BlockKind::Actions));
        assert_eq!(BlockKind::from_tag(0x00), None);
    }

    #[test]
    fn test_trailer_of_packet() {
        assert_eq!(Trailer::of_packet(&[1, 0, 0, 0, 0xFF]), Some(Trailer::Last));
        assert_eq!(Trailer::of_packet(&[1, 0, 0, 0, 9, 0xFE]), Some(Trailer::More));
        assert_eq!(Trailer::of_packet(&[1, 0, 0, 0, 0x01]), None);
        assert_eq!(Trailer::of_packet(&[0xFF]), None);
    }

    #[test]
    fn test_wire_resource_rejects_hash_mismatch() {
        let blob = Blob::new(ResourceKind::Texture2D, "t", vec![1, 2, 3]);
        let bytes = bincode::serialize(&WireResourceRef::from_blob(&blob)).unwrap();
        let mut record: WireResource = bincode::deserialize(&bytes).unwrap();
        record.data[0] = 9;

        assert!(record.into_blob().is_err());
    }

    #[test]
    fn test_wire_resource_uses_compressed_form() {
        let blob = Blob::new(ResourceKind::GeometryArray, "g", vec![7; 8192]);
        blob.compress();

        let wire = WireResourceRef::from_blob(&blob);
        assert!(wire.compressed);
        assert!(wire.data.len() < 8192);

        let bytes = bincode::serialize(&wire).unwrap();
        let record: WireResource = bincode::deserialize(&bytes).unwrap();
        let decoded = record.into_blob().unwrap();
        assert_eq!(decoded, blob);
    }
}
