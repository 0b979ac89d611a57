//! Content hashes and resource kinds

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Logical kind of an immutable resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceKind {
    /// Vertex or index array
    GeometryArray = 1,
    /// 2D texture with mip chain
    Texture2D = 2,
    /// Volume texture
    Texture3D = 3,
    /// Cube map texture
    TextureCube = 4,
    /// Compiled shader effect
    CompiledEffect = 5,
}

impl ResourceKind {
    /// All resource kinds
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::GeometryArray,
        ResourceKind::Texture2D,
        ResourceKind::Texture3D,
        ResourceKind::TextureCube,
        ResourceKind::CompiledEffect,
    ];

    /// Stable one-byte tag used in hashing and on disk
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a kind by its tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.tag() == tag)
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::GeometryArray => "GeometryArray",
            Self::Texture2D => "Texture2D",
            Self::Texture3D => "Texture3D",
            Self::TextureCube => "TextureCube",
            Self::CompiledEffect => "CompiledEffect",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 128-bit content hash identifying a blob
///
/// Equal hashes mean byte-identical contents of the same kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentHash {
    low: u64,
    high: u64,
}

impl ContentHash {
    /// The invalid (all-zero) hash
    pub const INVALID: ContentHash = ContentHash { low: 0, high: 0 };

    /// Create from raw words
    pub const fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    /// Hash a blob of the given kind
    pub fn compute(kind: ResourceKind, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[kind.tag()]);
        hasher.update(data);
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();

        let mut low = [0u8; 8];
        let mut high = [0u8; 8];
        low.copy_from_slice(&bytes[0..8]);
        high.copy_from_slice(&bytes[8..16]);

        Self {
            low: u64::from_le_bytes(low),
            high: u64::from_le_bytes(high),
        }
    }

    /// Lower 64 bits
    pub const fn low(&self) -> u64 {
        self.low
    }

    /// Upper 64 bits
    pub const fn high(&self) -> u64 {
        self.high
    }

    /// Check if this is a real hash
    pub const fn is_valid(&self) -> bool {
        self.low != 0 || self.high != 0
    }
}

impl Ord for ContentHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.high
            .cmp(&other.high)
            .then_with(|| self.low.cmp(&other.low))
    }
}

impl PartialOrd for ContentHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}
