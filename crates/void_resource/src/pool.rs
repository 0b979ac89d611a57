//! Resource Pool - share one blob across many scene contexts
//!
//! The pool keeps a handle per hash and counts how many scene contexts
//! instantiated it, so a blob is hashed and stored once no matter how many
//! scenes use it.

use crate::handle::ResourceHandle;
use crate::hash::{ContentHash, ResourceKind};
use crate::store::ResourceStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Pool bookkeeping for one resource
#[derive(Debug, Clone)]
pub struct ResourcePoolEntry {
    /// Handle held by the pool
    pub handle: ResourceHandle,
    /// Display name
    pub name: String,
    /// Number of scene contexts using the resource
    pub usage_count: u32,
}

/// Usage-counted pool of resources on top of a [`ResourceStore`]
pub struct ResourcePool {
    store: Arc<ResourceStore>,
    entries: HashMap<ContentHash, ResourcePoolEntry>,
}

impl ResourcePool {
    /// Create a pool backed by a store
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self {
            store,
            entries: HashMap::new(),
        }
    }

    /// Backing store
    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    /// Add bytes to the pool without instantiating them
    pub fn create(&mut self, kind: ResourceKind, name: impl Into<String>, data: Vec<u8>) -> ContentHash {
        let name = name.into();
        let handle = self.store.put(kind, name.clone(), data);
        let hash = handle.hash();

        self.entries.entry(hash).or_insert_with(|| ResourcePoolEntry {
            handle,
            name,
            usage_count: 0,
        });
        hash
    }

    /// Add a file-backed resource to the pool by hash
    pub fn load(&mut self, hash: ContentHash) -> bool {
        if self.entries.contains_key(&hash) {
            return true;
        }

        match self.store.get_handle(hash) {
            Some(handle) => {
                let name = handle.name().to_string();
                self.entries.insert(
                    hash,
                    ResourcePoolEntry {
                        handle,
                        name,
                        usage_count: 0,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Instantiate a pooled resource into a scene context
    pub fn instantiate(&mut self, hash: ContentHash) -> Option<ResourceHandle> {
        let entry = self.entries.get_mut(&hash)?;
        entry.usage_count += 1;
        Some(entry.handle.clone())
    }

    /// Release one scene-local instance
    ///
    /// Returns `true` if the entry was removed from the pool.
    pub fn release(&mut self, hash: ContentHash) -> bool {
        let Some(entry) = self.entries.get_mut(&hash) else {
            log::warn!("Release of unknown pooled resource {}", hash);
            return false;
        };

        if entry.usage_count == 0 {
            log::warn!("Release of pooled resource {} with no instances", hash);
        } else {
            entry.usage_count -= 1;
        }
        self.try_remove(hash)
    }

    /// Drop every unused entry nobody else references
    pub fn collect_garbage(&mut self) -> usize {
        let removable: Vec<ContentHash> = self
            .entries
            .iter()
            .filter(|(_, e)| Self::is_removable(e))
            .map(|(hash, _)| *hash)
            .collect();

        for hash in &removable {
            self.entries.remove(hash);
        }
        removable.len()
    }

    /// Usage count of a pooled resource
    pub fn usage_count(&self, hash: ContentHash) -> Option<u32> {
        self.entries.get(&hash).map(|e| e.usage_count)
    }

    /// Pool entry for a hash
    pub fn get(&self, hash: ContentHash) -> Option<&ResourcePoolEntry> {
        self.entries.get(&hash)
    }

    /// Check if a hash is pooled
    pub fn contains(&self, hash: ContentHash) -> bool {
        self.entries.contains_key(&hash)
    }

    /// Number of pooled resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn try_remove(&mut self, hash: ContentHash) -> bool {
        if self.entries.get(&hash).is_some_and(Self::is_removable) {
            self.entries.remove(&hash);
            log::debug!("Removed pooled resource {}", hash);
            return true;
        }
        false
    }

    fn is_removable(entry: &ResourcePoolEntry) -> bool {
        entry.usage_count == 0 && entry.handle.ref_count() == 1
    }
}
