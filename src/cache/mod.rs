//! Two-tier cache for decoded page images.
//!
//! The fast tier is an in-memory LRU bounded by entry count and total bytes.
//! The durable tier is a directory of files named by the SHA-256 of each key,
//! unbounded unless [`ImageCache::trim_disk`] is called with a configured
//! [`CacheConfig::disk_limit`].
//!
//! Keys are opaque to the cache. Callers combine a stable content id with the
//! page index (see [`PageRef::cache_key`](crate::PageRef::cache_key)) so each
//! distinct image gets its own key.
//!
//! Operations on one key are serialized through a sharded set of async
//! locks held across both tiers, so the tiers never disagree about a key and
//! a promotion cannot bring back a removed entry. [`ImageCache::clear_all`]
//! takes every shard.

mod disk;
mod memory;

pub use disk::{DiskTier, FILE_EXTENSION, key_digest};
pub use memory::MemoryTier;

use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::Result;

/// Default fast-tier entry limit
pub const DEFAULT_MEMORY_ENTRIES: usize = 100;
/// Default fast-tier byte limit (50 MiB)
pub const DEFAULT_MEMORY_BYTES: usize = 50 * 1024 * 1024;

const KEY_LOCK_SHARDS: usize = 64;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding the durable tier
    pub root: PathBuf,
    pub memory_entries: usize,
    pub memory_bytes: usize,
    /// Size the durable tier is trimmed to by [`ImageCache::trim_disk`]
    pub disk_limit: Option<u64>,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory_entries: DEFAULT_MEMORY_ENTRIES,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            disk_limit: None,
        }
    }
}

impl Default for CacheConfig {
    /// Durable tier under the platform cache directory.
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("cbzpage").join("pages"))
    }
}

/// Tiered image cache
pub struct ImageCache {
    memory: MemoryTier,
    disk: DiskTier,
    disk_limit: Option<u64>,
    key_locks: Vec<Mutex<()>>,
}

impl ImageCache {
    /// Build the cache and create the durable directory.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        let disk = DiskTier::new(config.root);
        disk.ensure_root().await?;
        Ok(Self {
            memory: MemoryTier::new(config.memory_entries, config.memory_bytes),
            disk,
            disk_limit: config.disk_limit,
            key_locks: (0..KEY_LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        })
    }

    async fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = (hasher.finish() % self.key_locks.len() as u64) as usize;
        self.key_locks[shard].lock().await
    }

    /// Look a key up, fast tier first.
    ///
    /// A durable hit is promoted into the fast tier. Any durable read failure
    /// is reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(data) = self.memory.get(key) {
            debug!(key, "memory cache hit");
            return Some(data);
        }

        let _guard = self.lock_key(key).await;
        // A writer may have finished while we waited
        if let Some(data) = self.memory.get(key) {
            debug!(key, "memory cache hit");
            return Some(data);
        }

        match self.disk.read(key).await {
            Ok(data) => {
                debug!(key, bytes = data.len(), "disk cache hit");
                let data = Bytes::from(data);
                self.memory.insert(key.to_string(), data.clone());
                Some(data)
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(key, error = %e, "disk cache read failed");
                }
                None
            }
        }
    }

    /// Store `data` in both tiers.
    ///
    /// A failed durable write is logged and otherwise ignored; the fast-tier
    /// insert stands and any older durable copy is dropped.
    pub async fn put(&self, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let _guard = self.lock_key(key).await;
        self.memory.insert(key.to_string(), data.clone());
        if let Err(e) = self.disk.write(key, data).await {
            warn!(key, error = %e, "disk cache write failed");
            if let Err(e) = self.disk.remove(key).await {
                debug!(key, error = %e, "stale disk cache entry not removed");
            }
        }
    }

    /// Drop `key` from both tiers.
    pub async fn remove(&self, key: &str) {
        let _guard = self.lock_key(key).await;
        self.memory.remove(key);
        if let Err(e) = self.disk.remove(key).await {
            warn!(key, error = %e, "disk cache remove failed");
        }
    }

    /// Empty both tiers, leaving an empty durable directory behind.
    pub async fn clear_all(&self) -> Result<()> {
        let mut guards = Vec::with_capacity(self.key_locks.len());
        for lock in &self.key_locks {
            guards.push(lock.lock().await);
        }
        self.memory.clear();
        self.disk.clear().await?;
        debug!(root = %self.disk.root().display(), "cache cleared");
        Ok(())
    }

    /// Trim the durable tier to the configured limit, oldest files first.
    ///
    /// Returns the number of files removed; without a limit nothing happens.
    pub async fn trim_disk(&self) -> Result<usize> {
        match self.disk_limit {
            Some(limit) => Ok(self.disk.trim_to(limit).await?),
            None => Ok(0),
        }
    }

    /// Bytes currently held by the durable tier
    pub async fn disk_usage(&self) -> Result<u64> {
        Ok(self.disk.usage().await?)
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache_in(dir: &tempfile::TempDir, entries: usize, bytes: usize) -> ImageCache {
        let mut config = CacheConfig::new(dir.path().join("pages"));
        config.memory_entries = entries;
        config.memory_bytes = bytes;
        ImageCache::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, 10, 1024).await;
        cache.put("k", b"image".to_vec()).await;
        cache.memory().clear();

        assert_eq!(cache.get("k").await.unwrap(), &b"image"[..]);
        assert_eq!(cache.memory().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_durable_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, 10, 1024).await;
        // A directory where the file should be cannot be read as one
        std::fs::create_dir(cache.disk().path_for("k")).unwrap();
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_disk_write_keeps_memory_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, 10, 1024).await;
        std::fs::remove_dir_all(cache.disk().root()).unwrap();

        cache.put("k", b"still here".to_vec()).await;
        assert_eq!(cache.get("k").await.unwrap(), &b"still here"[..]);
    }

    #[tokio::test]
    async fn test_trim_disk_without_limit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, 10, 1024).await;
        cache.put("k", vec![1u8; 64]).await;
        assert_eq!(cache.trim_disk().await.unwrap(), 0);
        assert_eq!(cache.disk_usage().await.unwrap(), 64);
    }
}
