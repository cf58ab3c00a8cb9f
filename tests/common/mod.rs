// Shared test doubles for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use block_slice::error::{BlockError, OriginErrorKind, Result};
use block_slice::origin::{Origin, OriginResponse};
use block_slice::BlockStore;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic object content: byte `i` is `i % 251`
pub fn object_bytes(size: usize) -> Bytes {
    Bytes::from((0..size).map(|i| (i % 251) as u8).collect::<Vec<_>>())
}

/// In-memory origin with call counting, concurrency tracking and per-block
/// failure and delay injection
pub struct MockOrigin {
    object: Mutex<Bytes>,
    block_size: u64,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing_blocks: Mutex<HashMap<u64, OriginErrorKind>>,
    delays: Mutex<HashMap<u64, Duration>>,
    default_delay: AtomicU64,
    requested_blocks: Mutex<Vec<u64>>,
}

impl MockOrigin {
    pub fn new(object: Bytes, block_size: u64) -> Self {
        MockOrigin {
            object: Mutex::new(object),
            block_size,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            failing_blocks: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            default_delay: AtomicU64::new(0),
            requested_blocks: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_block(&self, index: u64, kind: OriginErrorKind) {
        self.failing_blocks.lock().unwrap().insert(index, kind);
    }

    pub fn delay_block(&self, index: u64, delay: Duration) {
        self.delays.lock().unwrap().insert(index, delay);
    }

    /// Delay applied to every block without its own delay
    pub fn set_default_delay(&self, delay: Duration) {
        self.default_delay
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Replace the object, as if it was modified at the origin
    pub fn replace_object(&self, object: Bytes) {
        *self.object.lock().unwrap() = object;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requested_blocks(&self) -> Vec<u64> {
        self.requested_blocks.lock().unwrap().clone()
    }

    pub fn distinct_requested_blocks(&self) -> HashSet<u64> {
        self.requested_blocks().into_iter().collect()
    }
}

#[async_trait]
impl Origin for MockOrigin {
    async fn fetch_range(
        &self,
        _identity: &str,
        offset: u64,
        length: u64,
    ) -> std::result::Result<OriginResponse, OriginErrorKind> {
        let index = offset / self.block_size;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested_blocks.lock().unwrap().push(index);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or_else(|| Duration::from_millis(self.default_delay.load(Ordering::SeqCst)));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(kind) = self.failing_blocks.lock().unwrap().get(&index).cloned() {
            return Err(kind);
        }

        let object = self.object.lock().unwrap().clone();
        let total = object.len() as u64;
        if offset >= total {
            return Err(OriginErrorKind::RangeNotSatisfiable {
                complete_length: Some(total),
            });
        }
        let end = (offset + length).min(total);
        Ok(OriginResponse {
            data: object.slice(offset as usize..end as usize),
            total_size: total,
        })
    }
}

/// Store whose every operation fails
pub struct FailingStore;

#[async_trait]
impl BlockStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Err(BlockError::CacheError("store unavailable".to_string()))
    }

    async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
        Err(BlockError::CacheError("store unavailable".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Err(BlockError::CacheError("store unavailable".to_string()))
    }
}
