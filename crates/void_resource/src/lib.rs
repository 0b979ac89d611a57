//! # Void Resource - Content-Addressed Resource Store
//!
//! Immutable payloads (geometry arrays, textures, compiled effects) are
//! identified by the hash of their contents. Scenes reference them by hash,
//! distribution transfers them lazily, and the store keeps exactly one copy
//! of each blob alive for as long as someone holds a handle to it.
//!
//! ## Architecture
//!
//! ```text
//! put(bytes) ──► ContentHash ──► Registry (hash → weak entry) ◄── get_handle(hash)
//!                                      │
//!                       resident ◄─────┴─────► latent ──► ResourceFile (TOC + data)
//! ```
//!
//! ## Key Concepts
//!
//! - **ContentHash**: 128-bit identity derived from kind + bytes
//! - **ResourceHandle**: refcounted handle, resident or latent
//! - **ResourceStore**: registry of live handles plus registered backing files
//! - **ResourcePool**: usage-counted instantiation of blobs into scene contexts
//! - **ResolveWorker**: off-thread resolution of latent resources

pub mod blob;
pub mod file;
pub mod handle;
pub mod hash;
pub mod pool;
pub mod store;
pub mod worker;

pub use blob::Blob;
pub use file::{ResourceFile, ResourceFileWriter, TocEntry, FORMAT_VERSION};
pub use handle::ResourceHandle;
pub use hash::{ContentHash, ResourceKind};
pub use pool::{ResourcePool, ResourcePoolEntry};
pub use store::{FileHandle, ResourceStore, StoreStats};
pub use worker::{ResolveResponse, ResolveWorker};

use thiserror::Error;

/// Resource store errors
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(ContentHash),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt resource data: {0}")]
    Decode(String),

    #[error("Unknown resource file: {0}")]
    UnknownFile(FileHandle),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Resolve worker unavailable")]
    WorkerUnavailable,
}

impl From<bincode::Error> for ResourceError {
    fn from(e: bincode::Error) -> Self {
        ResourceError::Serialization(e.to_string())
    }
}

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, ResourceError>;
