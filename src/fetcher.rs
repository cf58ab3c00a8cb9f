//! Block Fetcher
//!
//! Resolves one block: from the block store when present, otherwise with a
//! single origin range request whose result is written back to the store.
//! Store failures are logged and counted but never fail a fetch.

use crate::cache::BlockStore;
use crate::cache_key::CacheKeyGenerator;
use crate::error::{BlockError, OriginErrorKind};
use crate::metrics::BlockMetrics;
use crate::models::{BlockSource, FetchOutcome, FetchedBlock};
use crate::origin::Origin;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetches single blocks through the cache
#[derive(Clone)]
pub struct BlockFetcher {
    store: Option<Arc<dyn BlockStore>>,
    origin: Arc<dyn Origin>,
    keys: CacheKeyGenerator,
    metrics: Arc<BlockMetrics>,
}

impl BlockFetcher {
    /// Create a fetcher that always goes to the origin
    pub fn new(origin: Arc<dyn Origin>, keys: CacheKeyGenerator) -> Self {
        BlockFetcher {
            store: None,
            origin,
            keys,
            metrics: Arc::new(BlockMetrics::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BlockMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Same store and origin, keyed for a different block size
    pub fn for_block_size(&self, block_size: u64) -> Self {
        BlockFetcher {
            keys: self.keys.for_block_size(block_size),
            ..self.clone()
        }
    }

    pub fn keys(&self) -> &CacheKeyGenerator {
        &self.keys
    }

    pub fn metrics(&self) -> &Arc<BlockMetrics> {
        &self.metrics
    }

    /// Fetch one block, cache first
    ///
    /// # Arguments
    /// * `identity` - Object identity (origin URL)
    /// * `block_index` - Block index within the object
    /// * `offset` - Byte offset of the block
    /// * `length` - Expected block length
    /// * `expected_size` - Object size the block must belong to; an origin
    ///   block from an object of another size fails with `SizeChanged` and is
    ///   not cached
    pub async fn fetch(
        &self,
        identity: &str,
        block_index: u64,
        offset: u64,
        length: u64,
        expected_size: Option<u64>,
    ) -> FetchOutcome {
        let key = self.keys.key(identity, block_index);

        if let Some(data) = self.lookup(&key, length).await {
            debug!(
                "Block cache hit: identity={}, block={}, size={}",
                identity,
                block_index,
                data.len()
            );
            self.metrics.record_cache_hit();
            self.metrics.record_bytes_from_cache(data.len() as u64);
            return FetchOutcome::Fetched(FetchedBlock {
                index: block_index,
                data,
                source: BlockSource::Cache,
                total_size: None,
            });
        }

        self.metrics.record_cache_miss();
        let outcome = self
            .fetch_origin_block(identity, block_index, offset, length, expected_size)
            .await;
        if let FetchOutcome::Fetched(block) = &outcome {
            self.store_block(&key, block.data.clone()).await;
        }
        outcome
    }

    /// Fetch one block from the origin without touching the cache
    ///
    /// Used when the object size is unknown: only an origin response reports
    /// the total size. Nothing is cached until the block is known to be part
    /// of a plan, see [`BlockFetcher::cache_block`].
    pub async fn fetch_from_origin(
        &self,
        identity: &str,
        block_index: u64,
        offset: u64,
        length: u64,
    ) -> FetchOutcome {
        self.fetch_origin_block(identity, block_index, offset, length, None)
            .await
    }

    /// Write an already fetched block to the cache (best-effort)
    pub async fn cache_block(&self, identity: &str, block: &FetchedBlock) {
        let key = self.keys.key(identity, block.index);
        self.store_block(&key, block.data.clone()).await;
    }

    async fn fetch_origin_block(
        &self,
        identity: &str,
        block_index: u64,
        offset: u64,
        length: u64,
        expected_size: Option<u64>,
    ) -> FetchOutcome {
        debug!(
            "Fetching block from origin: identity={}, block={}, offset={}, length={}",
            identity, block_index, offset, length
        );

        let response = match self.origin.fetch_range(identity, offset, length).await {
            Ok(response) => response,
            Err(kind) => {
                // A shrunken object rejects ranges past its new end
                let kind = match (kind, expected_size) {
                    (
                        OriginErrorKind::RangeNotSatisfiable {
                            complete_length: Some(actual),
                        },
                        Some(expected),
                    ) if actual != expected => OriginErrorKind::SizeChanged { expected, actual },
                    (kind, _) => kind,
                };
                warn!(
                    "Origin fetch failed: identity={}, block={}, error={}",
                    identity, block_index, kind
                );
                self.metrics.record_origin_fetch(false);
                return FetchOutcome::Failed {
                    index: block_index,
                    error: BlockError::origin(block_index, kind),
                };
            }
        };

        let received = response.data.len() as u64;
        let checked = match expected_size {
            Some(expected) if expected != response.total_size => {
                Err(OriginErrorKind::SizeChanged {
                    expected,
                    actual: response.total_size,
                })
            }
            _ => check_origin_length(offset, length, received, response.total_size),
        };
        if let Err(kind) = checked {
            warn!(
                "Rejecting origin block: identity={}, block={}, error={}",
                identity, block_index, kind
            );
            self.metrics.record_origin_fetch(false);
            return FetchOutcome::Failed {
                index: block_index,
                error: BlockError::origin(block_index, kind),
            };
        }

        self.metrics.record_origin_fetch(true);
        self.metrics.record_bytes_from_origin(received);

        FetchOutcome::Fetched(FetchedBlock {
            index: block_index,
            data: response.data,
            source: BlockSource::Origin,
            total_size: Some(response.total_size),
        })
    }

    async fn lookup(&self, key: &str, length: u64) -> Option<Bytes> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(data)) if data.len() as u64 == length => Some(data),
            Ok(Some(data)) => {
                warn!(
                    "Cached block has {} bytes, expected {}; refetching: key={}",
                    data.len(),
                    length,
                    key
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed, treating as miss: key={}, error={}", key, e);
                self.metrics.record_cache_error();
                None
            }
        }
    }

    async fn store_block(&self, key: &str, data: Bytes) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(e) = store.put(key, data).await {
            warn!("Failed to store block in cache: key={}, error={}", key, e);
            self.metrics.record_cache_error();
        }
    }

    /// Object size remembered from an earlier request, if any
    pub async fn lookup_object_size(&self, identity: &str) -> Option<u64> {
        let store = self.store.as_ref()?;
        let key = self.keys.size_key(identity);
        match store.get(&key).await {
            Ok(Some(raw)) => std::str::from_utf8(&raw).ok()?.parse().ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Size lookup failed: key={}, error={}", key, e);
                self.metrics.record_cache_error();
                None
            }
        }
    }

    /// Remember an object's size for later requests (best-effort)
    pub async fn remember_object_size(&self, identity: &str, size: u64) {
        let key = self.keys.size_key(identity);
        self.store_block(&key, Bytes::from(size.to_string())).await;
    }

    /// Forget a stale version of an object
    ///
    /// Drops the size record and the first `block_count` blocks, so the next
    /// request rediscovers the size and never mixes cached bytes of the old
    /// version with origin bytes of the new one.
    pub async fn invalidate_object(&self, identity: &str, block_count: u64) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let keys = std::iter::once(self.keys.size_key(identity))
            .chain((0..block_count).map(|index| self.keys.key(identity, index)));
        for key in keys {
            if let Err(e) = store.remove(&key).await {
                warn!("Failed to drop stale cache entry: key={}, error={}", key, e);
                self.metrics.record_cache_error();
            }
        }
        debug!(
            "Invalidated cached object: identity={}, blocks={}",
            identity, block_count
        );
    }
}

/// Check the origin returned exactly the bytes of `[offset, offset + length)`
/// that exist in an object of `total_size` bytes
fn check_origin_length(
    offset: u64,
    length: u64,
    received: u64,
    total_size: u64,
) -> std::result::Result<(), OriginErrorKind> {
    if offset >= total_size {
        return Err(OriginErrorKind::RangeNotSatisfiable {
            complete_length: Some(total_size),
        });
    }
    let expected = length.min(total_size - offset);
    if received != expected {
        return Err(OriginErrorKind::Protocol(format!(
            "origin returned {} bytes for block at offset {}, expected {}",
            received, offset, expected
        )));
    }
    Ok(())
}
