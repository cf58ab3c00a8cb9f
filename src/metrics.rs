//! Metrics collection for block serving
//!
//! Thread-safe counters built on atomics. They track requests, cache
//! hits/misses, origin block fetches, bytes moved and latencies.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector shared by the fetcher and the proxy
#[derive(Debug, Default)]
pub struct BlockMetrics {
    // Request statistics
    total_requests: AtomicU64,
    full_requests: AtomicU64,
    partial_requests: AtomicU64,
    failed_requests: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,

    // Origin statistics
    origin_fetches: AtomicU64,
    origin_failures: AtomicU64,

    // Byte statistics
    bytes_from_origin: AtomicU64,
    bytes_from_cache: AtomicU64,
    bytes_to_client: AtomicU64,

    // Latency statistics (microseconds)
    total_request_duration_us: AtomicU64,
    total_fetch_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub full_requests: u64,
    pub partial_requests: u64,
    pub failed_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,

    pub origin_fetches: u64,
    pub origin_failures: u64,

    pub bytes_from_origin: u64,
    pub bytes_from_cache: u64,
    pub bytes_to_client: u64,

    pub total_request_duration_us: u64,
    pub total_fetch_duration_us: u64,
}

impl BlockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a served request
    ///
    /// # Arguments
    /// * `partial` - Whether the response was 206 Partial Content
    pub fn record_request(&self, partial: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if partial {
            self.partial_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.full_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request that ended in an error response
    pub fn record_failed_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed cache get or put; these never fail a request
    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one origin range request
    pub fn record_origin_fetch(&self, success: bool) {
        self.origin_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.origin_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bytes_from_origin(&self, bytes: u64) {
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record how long fetching all blocks of one served request took
    pub fn record_fetch_duration(&self, duration: Duration) {
        self.total_fetch_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken under load is not
    /// perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            full_requests: self.full_requests.load(Ordering::Relaxed),
            partial_requests: self.partial_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            total_fetch_duration_us: self.total_fetch_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.full_requests,
            &self.partial_requests,
            &self.failed_requests,
            &self.cache_hits,
            &self.cache_misses,
            &self.cache_errors,
            &self.origin_fetches,
            &self.origin_failures,
            &self.bytes_from_origin,
            &self.bytes_from_cache,
            &self.bytes_to_client,
            &self.total_request_duration_us,
            &self.total_fetch_duration_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Average time spent fetching blocks per served request, in milliseconds
    pub fn avg_fetch_duration_ms(&self) -> f64 {
        let served = self.full_requests + self.partial_requests;
        if served == 0 {
            0.0
        } else {
            (self.total_fetch_duration_us as f64 / served as f64) / 1000.0
        }
    }

    /// Origin failure rate as a percentage (0.0 to 100.0)
    pub fn origin_failure_rate(&self) -> f64 {
        if self.origin_fetches == 0 {
            0.0
        } else {
            (self.origin_failures as f64 / self.origin_fetches as f64) * 100.0
        }
    }
}
