//! Block Slice
//!
//! A range-serving cache front end that stores large objects only as
//! fixed-size blocks. A client request, with or without a `Range` header, is
//! mapped onto the blocks it touches; missing blocks are fetched from the
//! origin in parallel, and the response body is stitched together from the
//! blocks, trimmed to the exact bytes requested.
//!
//! # Overview
//!
//! - [`BlockGeometry`]: block arithmetic and request planning
//! - [`CacheKeyGenerator`]: stable per-block cache keys
//! - [`BlockFetcher`]: one block, cache first, origin on a miss
//! - [`ParallelOrchestrator`]: all blocks of a plan with bounded concurrency
//! - [`ResponseAssembler`]: status, headers and trimmed body
//! - [`BlockProxy`]: the request pipeline tying them together
//! - [`BlockServer`]: hyper front end for the binary
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use block_slice::{BlockProxy, BlockSliceConfig, ObjectRequest, RangeSpec};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BlockSliceConfig::from_file("block_slice.yaml")?;
//! let proxy = BlockProxy::from_config(Arc::new(config))?;
//!
//! let request = ObjectRequest::new("http://origin.example.com/video.mp4")
//!     .with_range(RangeSpec::parse("bytes=900000-1999999")?);
//! let response = proxy.handle(&request).await;
//! println!("{} ({} bytes)", response.status, response.body_len());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! block_size: 1048576          # 1MiB blocks
//! max_parallel_fetches: 5
//! listen_address: "0.0.0.0:8080"
//! origin:
//!   base_url: "http://origin.example.com"
//!   timeout_secs: 30
//! cache:
//!   enabled: true
//!   ttl_secs: 3600
//!   max_size_bytes: 268435456
//! key_format: plain            # or "hashed"
//! ```
//!
//! See [`BlockSliceConfig`] for every option.

pub mod cache;
pub mod cache_key;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod geometry;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod orchestrator;
pub mod origin;
pub mod proxy;
pub mod response_assembler;
pub mod server;

// Re-export commonly used types
pub use cache::{BlockStore, CacheStats, MemoryBlockStore};
pub use cache_key::{CacheKeyGenerator, KeyFormat};
pub use config::{BlockSliceConfig, CacheConfig, MetricsEndpointConfig, OriginConfig};
pub use error::{BlockError, OriginErrorKind, Result};
pub use fetcher::BlockFetcher;
pub use geometry::{plan, BlockGeometry};
pub use metrics::{BlockMetrics, MetricsSnapshot};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{
    BlockPlan, BlockSource, BlockSpan, ByteRange, ContentRange, FetchOutcome, FetchedBlock,
    RangeSpec,
};
pub use orchestrator::{ParallelOrchestrator, DEFAULT_MAX_PARALLEL};
pub use origin::{HttpOrigin, Origin, OriginResponse};
pub use proxy::{BlockProxy, ObjectRequest, RequestOverrides};
pub use response_assembler::{AssembledResponse, ResponseAssembler};
pub use server::{handle_request, BlockServer};
