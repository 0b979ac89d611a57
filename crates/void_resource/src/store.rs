//! Resource Store - content-addressed registry of blobs
//!
//! The store hands out [`ResourceHandle`]s. A hash is known to the store if a
//! handle to it is alive or if a registered resource file lists it. Bytes of
//! live handles are cached; once the last handle is dropped the entry is
//! forgotten and only file-backed hashes remain resolvable.
//!
//! Lock order is files before registry. The registry lock is never held
//! while an entry can be dropped.

use crate::blob::Blob;
use crate::file::ResourceFile;
use crate::handle::{Registry, ResourceEntry, ResourceHandle};
use crate::hash::{ContentHash, ResourceKind};
use crate::{ResourceError, ResourceResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a registered resource file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHandle(u32);

impl FileHandle {
    /// Get the raw value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Hashes with at least one live handle
    pub live_resources: usize,
    /// Live hashes whose bytes are in memory
    pub resident_resources: usize,
    /// Registered resource files
    pub registered_files: usize,
    /// Total put calls
    pub puts: u64,
    /// Puts answered with an existing handle
    pub dedup_hits: u64,
    /// Successful loads from resource files
    pub file_loads: u64,
    /// Failed loads from resource files
    pub failed_loads: u64,
}

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    dedup_hits: AtomicU64,
    file_loads: AtomicU64,
    failed_loads: AtomicU64,
}

/// Content-addressed resource store
///
/// Shared between scenes and I/O threads as `Arc<ResourceStore>`.
pub struct ResourceStore {
    registry: Arc<Registry>,
    files: RwLock<BTreeMap<FileHandle, Arc<ResourceFile>>>,
    next_file: AtomicU32,
    counters: Counters,
}

impl ResourceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            files: RwLock::new(BTreeMap::new()),
            next_file: AtomicU32::new(1),
            counters: Counters::default(),
        }
    }

    /// Store bytes, returning the existing handle for identical content
    pub fn put(&self, kind: ResourceKind, name: impl Into<String>, data: Vec<u8>) -> ResourceHandle {
        self.put_blob(Blob::new(kind, name, data))
    }

    /// Store an already built blob
    pub fn put_blob(&self, blob: Blob) -> ResourceHandle {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        let hash = blob.hash();

        let mut registry = self.registry.lock();
        if let Some(entry) = registry.get(&hash).and_then(Weak::upgrade) {
            drop(registry);
            self.counters.dedup_hits.fetch_add(1, Ordering::Relaxed);
            // A latent entry can take the bytes we were just given
            if !entry.is_resident() {
                entry.fill(Arc::new(blob));
            }
            return ResourceHandle::from_entry(entry);
        }

        let entry = Arc::new(ResourceEntry::resident(
            Arc::new(blob),
            Some(Arc::downgrade(&self.registry)),
        ));
        registry.insert(hash, Arc::downgrade(&entry));
        drop(registry);

        log::trace!("Stored resource {}", hash);
        ResourceHandle::from_entry(entry)
    }

    /// Get a handle for a known hash, resident or latent
    pub fn get_handle(&self, hash: ContentHash) -> Option<ResourceHandle> {
        if let Some(entry) = self.live_entry(hash) {
            return Some(ResourceHandle::from_entry(entry));
        }

        let (kind, name) = {
            let files = self.files.read();
            files
                .values()
                .find_map(|file| file.entry(hash).map(|e| (e.kind, e.name.clone())))?
        };

        let mut registry = self.registry.lock();
        if let Some(entry) = registry.get(&hash).and_then(Weak::upgrade) {
            drop(registry);
            return Some(ResourceHandle::from_entry(entry));
        }

        let entry = Arc::new(ResourceEntry::latent(
            hash,
            kind,
            name,
            Arc::downgrade(&self.registry),
        ));
        registry.insert(hash, Arc::downgrade(&entry));
        drop(registry);

        Some(ResourceHandle::from_entry(entry))
    }

    /// Check if a hash can currently be resolved
    pub fn contains(&self, hash: ContentHash) -> bool {
        self.live_entry(hash).is_some() || self.file_for(hash).is_some()
    }

    /// Resolve a hash to its bytes
    ///
    /// Latent resources are loaded synchronously from their backing file.
    /// Callers on latency-sensitive threads should go through a
    /// [`crate::ResolveWorker`] instead.
    pub fn resolve(&self, hash: ContentHash) -> ResourceResult<Arc<Blob>> {
        if let Some(entry) = self.live_entry(hash) {
            return self.materialize(&entry);
        }

        // No live handle: serve from a file without caching
        let file = self.file_for(hash).ok_or(ResourceError::NotFound(hash))?;
        self.load_from(&file, hash).map(Arc::new)
    }

    /// Make a held handle resident and return its bytes
    pub fn resolve_handle(&self, handle: &ResourceHandle) -> ResourceResult<Arc<Blob>> {
        self.materialize(&handle.entry)
    }

    /// Register a backing file of latent resources
    pub fn register_file(&self, path: impl AsRef<Path>) -> ResourceResult<FileHandle> {
        let file = ResourceFile::open(path)?;
        let handle = FileHandle(self.next_file.fetch_add(1, Ordering::Relaxed));

        log::info!(
            "Registered resource file {} as {} ({} resources)",
            file.path().display(),
            handle,
            file.len()
        );
        self.files.write().insert(handle, Arc::new(file));
        Ok(handle)
    }

    /// Remove a backing file
    ///
    /// Still-referenced latent resources that no other file can back are
    /// loaded before the file goes away, so held handles keep resolving.
    pub fn remove_file(&self, handle: FileHandle) -> ResourceResult<()> {
        let mut files = self.files.write();
        let file = files.remove(&handle).ok_or(ResourceError::UnknownFile(handle))?;

        let registry = self.registry.lock();
        let live: Vec<Arc<ResourceEntry>> = file
            .entries()
            .filter_map(|e| registry.get(&e.hash).and_then(Weak::upgrade))
            .collect();
        drop(registry);

        let mut force_loaded = 0usize;
        for entry in &live {
            let hash = entry.hash();
            if entry.is_resident() || files.values().any(|f| f.contains(hash)) {
                continue;
            }
            match self.load_from(&file, hash) {
                Ok(blob) => {
                    entry.fill(Arc::new(blob));
                    force_loaded += 1;
                }
                Err(e) => log::warn!("Could not keep {} resident while removing {}: {}", hash, handle, e),
            }
        }
        drop(files);

        log::info!(
            "Removed resource file {} ({} referenced resources kept resident)",
            handle,
            force_loaded
        );
        drop(live);
        Ok(())
    }

    /// Number of registered files
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Store statistics
    pub fn stats(&self) -> StoreStats {
        let registry = self.registry.lock();
        let live: Vec<Arc<ResourceEntry>> = registry.values().filter_map(Weak::upgrade).collect();
        drop(registry);
        let resident = live.iter().filter(|e| e.is_resident()).count();

        let stats = StoreStats {
            live_resources: live.len(),
            resident_resources: resident,
            registered_files: self.file_count(),
            puts: self.counters.puts.load(Ordering::Relaxed),
            dedup_hits: self.counters.dedup_hits.load(Ordering::Relaxed),
            file_loads: self.counters.file_loads.load(Ordering::Relaxed),
            failed_loads: self.counters.failed_loads.load(Ordering::Relaxed),
        };
        drop(live);
        stats
    }

    fn live_entry(&self, hash: ContentHash) -> Option<Arc<ResourceEntry>> {
        self.registry.lock().get(&hash).and_then(Weak::upgrade)
    }

    fn file_for(&self, hash: ContentHash) -> Option<Arc<ResourceFile>> {
        self.files.read().values().find(|f| f.contains(hash)).cloned()
    }

    fn materialize(&self, entry: &ResourceEntry) -> ResourceResult<Arc<Blob>> {
        if let Some(blob) = entry.blob() {
            return Ok(blob);
        }

        let hash = entry.hash();
        match self.file_for(hash) {
            Some(file) => {
                let blob = self.load_from(&file, hash)?;
                Ok(entry.fill(Arc::new(blob)))
            }
            // A concurrent remove_file may have loaded it for us
            None => entry.blob().ok_or(ResourceError::NotFound(hash)),
        }
    }

    fn load_from(&self, file: &ResourceFile, hash: ContentHash) -> ResourceResult<Blob> {
        match file.load(hash) {
            Ok(blob) => {
                self.counters.file_loads.fetch_add(1, Ordering::Relaxed);
                log::debug!("Loaded {} from {}", hash, file.path().display());
                Ok(blob)
            }
            Err(e) => {
                self.counters.failed_loads.fetch_add(1, Ordering::Relaxed);
                log::error!("Failed to load {} from {}: {}", hash, file.path().display(), e);
                Err(e)
            }
        }
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}
