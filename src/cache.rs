//! Block storage
//!
//! The fetcher only sees the [`BlockStore`] capability, so the real caching
//! tier and the in-memory store below are interchangeable. Writes are
//! best-effort and idempotent: storing the same block twice is harmless.

use crate::error::{BlockError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Key-value capability for cached blocks
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Look up a key; `Ok(None)` is a miss
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a value under a key, replacing any previous value
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Drop a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

struct CacheEntry {
    data: Bytes,
    expires_at: Instant,
    last_accessed: Instant,
}

#[derive(Default)]
struct Storage {
    entries: HashMap<String, CacheEntry>,
    current_size_bytes: usize,
}

impl Storage {
    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.current_size_bytes = self.current_size_bytes.saturating_sub(old.data.len());
        }
    }

    fn cleanup_expired(&mut self, now: Instant) {
        let mut removed_bytes = 0;
        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed_bytes += entry.data.len();
                false
            } else {
                true
            }
        });
        self.current_size_bytes = self.current_size_bytes.saturating_sub(removed_bytes);
    }

    /// Evict least recently used entries until `needed_bytes` fit in `max_size`
    fn evict_lru(&mut self, needed_bytes: usize, max_size: usize) {
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed))
            .collect();
        by_age.sort_by_key(|(_, last_accessed)| *last_accessed);

        let mut evicted = 0;
        for (key, _) in by_age {
            if self.current_size_bytes + needed_bytes <= max_size {
                break;
            }
            self.remove(&key);
            evicted += 1;
        }
        debug!(
            "LRU eviction: removed {} entries, {} bytes in use",
            evicted, self.current_size_bytes
        );
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-process block store with TTL expiry and an optional LRU byte budget
pub struct MemoryBlockStore {
    storage: RwLock<Storage>,
    ttl: Duration,
    max_size_bytes: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryBlockStore {
    /// Create a store without a size limit
    pub fn new(ttl: Duration) -> Self {
        MemoryBlockStore {
            storage: RwLock::new(Storage::default()),
            ttl,
            max_size_bytes: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a store that evicts least recently used blocks beyond `max_size_bytes`
    pub fn with_max_size(ttl: Duration, max_size_bytes: usize) -> Self {
        MemoryBlockStore {
            max_size_bytes: Some(max_size_bytes),
            ..MemoryBlockStore::new(ttl)
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        let (total_entries, total_bytes) = match self.storage.read() {
            Ok(storage) => (storage.entries.len(), storage.current_size_bytes),
            Err(_) => (0, 0),
        };
        CacheStats {
            total_entries,
            total_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.storage
            .read()
            .map(|s| s.entries.get(key).is_some_and(|e| e.expires_at > now))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        let mut storage = self
            .storage
            .write()
            .map_err(|e| BlockError::CacheError(format!("cache lock poisoned: {}", e)))?;

        let result = match storage.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = now;
                Some(entry.data.clone())
            }
            Some(_) => {
                debug!("Cache entry expired: key={}", key);
                storage.remove(key);
                None
            }
            None => None,
        };

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let now = Instant::now();
        let data_size = data.len();
        let mut storage = self
            .storage
            .write()
            .map_err(|e| BlockError::CacheError(format!("cache lock poisoned: {}", e)))?;

        storage.remove(key);

        if let Some(max_size) = self.max_size_bytes {
            if data_size > max_size {
                return Err(BlockError::CacheError(format!(
                    "entry of {} bytes exceeds cache budget of {} bytes",
                    data_size, max_size
                )));
            }
            if storage.current_size_bytes + data_size > max_size {
                storage.cleanup_expired(now);
                storage.evict_lru(data_size, max_size);
            }
        }

        storage.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                expires_at: now + self.ttl,
                last_accessed: now,
            },
        );
        storage.current_size_bytes += data_size;

        debug!("Stored cache entry: key={}, size={}", key, data_size);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|e| BlockError::CacheError(format!("cache lock poisoned: {}", e)))?;
        storage.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryBlockStore::new(Duration::from_secs(60));
        store.put("k", Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(store.get("missing").await.unwrap(), None);

        let stats = store.get_stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_bytes, 5);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_size_accounting() {
        let store = MemoryBlockStore::new(Duration::from_secs(60));
        store.put("k", Bytes::from(vec![0u8; 10])).await.unwrap();
        store.put("k", Bytes::from(vec![0u8; 10])).await.unwrap();
        assert_eq!(store.get_stats().total_bytes, 10);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = MemoryBlockStore::new(Duration::from_millis(10));
        store.put("k", Bytes::from_static(b"x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryBlockStore::with_max_size(Duration::from_secs(60), 30);
        store.put("a", Bytes::from(vec![1u8; 10])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.put("b", Bytes::from(vec![2u8; 10])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.put("c", Bytes::from(vec![3u8; 10])).await.unwrap();
        // touch "a" so "b" becomes the oldest
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.get("a").await.unwrap();
        store.put("d", Bytes::from(vec![4u8; 10])).await.unwrap();

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(store.contains("d"));
        assert_eq!(store.get_stats().total_bytes, 30);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let store = MemoryBlockStore::with_max_size(Duration::from_secs(60), 4);
        assert!(store.put("k", Bytes::from(vec![0u8; 5])).await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryBlockStore::new(Duration::from_secs(60));
        store.put("k", Bytes::from_static(b"xyz")).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("missing").await.unwrap();
        assert!(!store.contains("k"));
        assert_eq!(store.get_stats().total_bytes, 0);
    }
}
