//! Resource handles - shared references to content-addressed blobs
//!
//! Handles provide:
//! - Reference counting (the entry lives exactly as long as its handles)
//! - Resident or latent residency
//! - Automatic registry cleanup when the last handle goes away

use crate::blob::Blob;
use crate::hash::{ContentHash, ResourceKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Hash → entry table shared between a store and its entries
pub(crate) type Registry = Mutex<HashMap<ContentHash, Weak<ResourceEntry>>>;

/// Internal entry shared by all handles to one hash
pub(crate) struct ResourceEntry {
    hash: ContentHash,
    kind: ResourceKind,
    name: String,
    /// Loaded bytes; `None` while latent
    blob: RwLock<Option<Arc<Blob>>>,
    /// Owning registry, absent for detached handles
    registry: Option<Weak<Registry>>,
}

impl ResourceEntry {
    /// Create a resident entry
    pub(crate) fn resident(blob: Arc<Blob>, registry: Option<Weak<Registry>>) -> Self {
        Self {
            hash: blob.hash(),
            kind: blob.kind(),
            name: blob.name().to_string(),
            blob: RwLock::new(Some(blob)),
            registry,
        }
    }

    /// Create a latent entry known only by hash
    pub(crate) fn latent(
        hash: ContentHash,
        kind: ResourceKind,
        name: String,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            hash,
            kind,
            name,
            blob: RwLock::new(None),
            registry: Some(registry),
        }
    }

    pub(crate) fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Current bytes, if resident
    pub(crate) fn blob(&self) -> Option<Arc<Blob>> {
        self.blob.read().clone()
    }

    pub(crate) fn is_resident(&self) -> bool {
        self.blob.read().is_some()
    }

    /// Install loaded bytes unless another loader won the race
    ///
    /// Returns whichever blob ends up resident.
    pub(crate) fn fill(&self, blob: Arc<Blob>) -> Arc<Blob> {
        let mut slot = self.blob.write();
        match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                *slot = Some(blob.clone());
                blob
            }
        }
    }
}

impl Drop for ResourceEntry {
    fn drop(&mut self) {
        let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) else {
            return;
        };

        let mut map = registry.lock();
        // A concurrent put may already have replaced this entry
        if map.get(&self.hash).is_some_and(|weak| weak.strong_count() == 0) {
            map.remove(&self.hash);
            log::trace!("Released resource {}", self.hash);
        }
    }
}

/// Strong handle to a content-addressed resource
///
/// The resource stays known to its store as long as there are handles.
#[derive(Clone)]
pub struct ResourceHandle {
    pub(crate) entry: Arc<ResourceEntry>,
}

impl ResourceHandle {
    pub(crate) fn from_entry(entry: Arc<ResourceEntry>) -> Self {
        Self { entry }
    }

    /// Create a handle that is not registered in any store
    ///
    /// Used on the receiving side of a connection, where blobs arrive
    /// with their bytes and are owned by the recipient.
    pub fn detached(blob: Blob) -> Self {
        Self {
            entry: Arc::new(ResourceEntry::resident(Arc::new(blob), None)),
        }
    }

    /// Content hash
    pub fn hash(&self) -> ContentHash {
        self.entry.hash
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.entry.kind
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Check if bytes are in memory
    pub fn is_resident(&self) -> bool {
        self.entry.is_resident()
    }

    /// Get the bytes if resident
    pub fn blob(&self) -> Option<Arc<Blob>> {
        self.entry.blob()
    }

    /// Number of live handles to this resource
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry)
    }

    /// Check whether two handles share one entry
    pub fn ptr_eq(&self, other: &ResourceHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Check if this handle belongs to a store
    pub fn is_detached(&self) -> bool {
        self.entry.registry.is_none()
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.entry.hash == other.entry.hash
    }
}

impl Eq for ResourceHandle {}

impl Hash for ResourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entry.hash.hash(state);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("hash", &self.entry.hash)
            .field("kind", &self.entry.kind)
            .field("resident", &self.is_resident())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
