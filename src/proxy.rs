//! Request pipeline tying the block components together
//!
//! [`BlockProxy`] turns one client request into a response: it learns the
//! object size, plans the blocks, fetches them through the cache with bounded
//! parallelism and assembles the body. It knows nothing about sockets; the
//! HTTP front end lives in [`crate::server`].

use crate::cache::{BlockStore, MemoryBlockStore};
use crate::cache_key::CacheKeyGenerator;
use crate::config::BlockSliceConfig;
use crate::error::{BlockError, OriginErrorKind, Result};
use crate::fetcher::BlockFetcher;
use crate::geometry::BlockGeometry;
use crate::metrics::BlockMetrics;
use crate::models::{FetchedBlock, RangeSpec};
use crate::orchestrator::ParallelOrchestrator;
use crate::origin::{HttpOrigin, Origin};
use crate::response_assembler::{AssembledResponse, ResponseAssembler};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-request tuning carried in the `x-sc-conf` header
///
/// The value is a comma separated list of `key=value` pairs: `b` sets the
/// block size (1MiB to 50MiB) and `p` the parallelism (1 to 10). Unknown keys
/// and out-of-bounds values are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    pub block_size: Option<u64>,
    pub max_parallel: Option<usize>,
}

impl RequestOverrides {
    pub const HEADER: &'static str = "x-sc-conf";
    pub const MIN_BLOCK_SIZE: u64 = 1024 * 1024;
    pub const MAX_BLOCK_SIZE: u64 = 50 * 1024 * 1024;
    pub const MAX_PARALLEL: usize = 10;

    pub fn from_header(value: &str) -> Self {
        let mut overrides = RequestOverrides::default();
        for part in value.split(',') {
            match part.trim().split_once('=') {
                Some(("b", v)) => match v.trim().parse::<u64>() {
                    Ok(size) if (Self::MIN_BLOCK_SIZE..=Self::MAX_BLOCK_SIZE).contains(&size) => {
                        overrides.block_size = Some(size)
                    }
                    _ => debug!("Ignoring block size override: {}", v),
                },
                Some(("p", v)) => match v.trim().parse::<usize>() {
                    Ok(p) if (1..=Self::MAX_PARALLEL).contains(&p) => {
                        overrides.max_parallel = Some(p)
                    }
                    _ => debug!("Ignoring parallelism override: {}", v),
                },
                _ => debug!("Ignoring unknown override: {}", part),
            }
        }
        overrides
    }

    pub fn is_empty(&self) -> bool {
        self.block_size.is_none() && self.max_parallel.is_none()
    }
}

/// One client request for an object, already parsed from HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    /// Stable object identity; for HTTP origins this is the origin URL
    pub identity: String,
    /// Requested range, `None` for the whole object
    pub range: Option<RangeSpec>,
    /// Object size when the caller already knows it
    pub size_hint: Option<u64>,
    /// HEAD request: same headers, no body, no block fetches once the size is known
    pub head_only: bool,
    pub overrides: RequestOverrides,
}

impl ObjectRequest {
    pub fn new(identity: impl Into<String>) -> Self {
        ObjectRequest {
            identity: identity.into(),
            range: None,
            size_hint: None,
            head_only: false,
            overrides: RequestOverrides::default(),
        }
    }

    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn head(mut self) -> Self {
        self.head_only = true;
        self
    }

    pub fn with_overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Block-caching request pipeline
#[derive(Clone)]
pub struct BlockProxy {
    config: Arc<BlockSliceConfig>,
    geometry: BlockGeometry,
    fetcher: Arc<BlockFetcher>,
    orchestrator: ParallelOrchestrator,
    assembler: ResponseAssembler,
    metrics: Arc<BlockMetrics>,
}

impl BlockProxy {
    /// Create a new BlockProxy
    ///
    /// # Arguments
    /// * `config` - Validated configuration
    /// * `origin` - Byte source for cache misses
    /// * `store` - Block cache; `None` sends every block to the origin
    pub fn new(
        config: Arc<BlockSliceConfig>,
        origin: Arc<dyn Origin>,
        store: Option<Arc<dyn BlockStore>>,
    ) -> Result<Self> {
        let geometry = BlockGeometry::new(config.block_size)?;
        let metrics = Arc::new(BlockMetrics::new());

        let mut keys = CacheKeyGenerator::new(config.block_size).with_format(config.key_format);
        if let Some(namespace) = &config.key_namespace {
            keys = keys.with_namespace(namespace.clone());
        }

        let mut fetcher = BlockFetcher::new(origin, keys).with_metrics(Arc::clone(&metrics));
        if let Some(store) = store {
            fetcher = fetcher.with_store(store);
        }
        let fetcher = Arc::new(fetcher);
        let orchestrator =
            ParallelOrchestrator::new(Arc::clone(&fetcher), config.max_parallel_fetches);

        Ok(BlockProxy {
            config,
            geometry,
            fetcher,
            orchestrator,
            assembler: ResponseAssembler::new(),
            metrics,
        })
    }

    /// Build the proxy the server binary runs: an HTTP origin and, when
    /// enabled, an in-memory block cache
    pub fn from_config(config: Arc<BlockSliceConfig>) -> Result<Self> {
        let mut origin = HttpOrigin::new(config.origin.timeout())?;
        if let Some(host) = &config.origin.host_header {
            origin = origin.with_host_header(host.clone());
        }

        let store: Option<Arc<dyn BlockStore>> = if config.cache.enabled {
            Some(Arc::new(MemoryBlockStore::with_max_size(
                config.cache.ttl(),
                config.cache.max_size_bytes,
            )))
        } else {
            None
        };

        Self::new(config, Arc::new(origin), store)
    }

    pub fn config(&self) -> &BlockSliceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<BlockMetrics> {
        &self.metrics
    }

    pub fn fetcher(&self) -> &Arc<BlockFetcher> {
        &self.fetcher
    }

    /// Serve a request, turning failures into error responses
    ///
    /// Every request is counted exactly once, as served or as failed.
    pub async fn handle(&self, request: &ObjectRequest) -> AssembledResponse {
        let started = Instant::now();
        let result = self.serve(request).await;
        self.metrics.record_request_duration(started.elapsed());

        match result {
            Ok(response) => {
                self.metrics.record_request(request.range.is_some());
                self.metrics.record_bytes_to_client(response.body_len());
                info!(
                    "Served identity={} status={} bytes={} in {:?}",
                    request.identity,
                    response.status,
                    response.body_len(),
                    started.elapsed()
                );
                response
            }
            Err(e) => {
                self.metrics.record_failed_request();
                if e.is_internal() {
                    error!("Request failed for identity={}: {}", request.identity, e);
                } else {
                    warn!("Request failed for identity={}: {}", request.identity, e);
                }
                self.assembler.error_response(&e)
            }
        }
    }

    /// Serve a request
    ///
    /// # Returns
    /// * `Ok(AssembledResponse)` with status 200 or 206
    /// * `Err(BlockError)` when the range is unsatisfiable or any block fails
    pub async fn serve(&self, request: &ObjectRequest) -> Result<AssembledResponse> {
        let identity = request.identity.as_str();
        let (geometry, orchestrator) = self.pipeline_for(&request.overrides)?;
        let fetcher = orchestrator.fetcher();

        let mut seed: Option<FetchedBlock> = None;
        let object_size = match request.size_hint {
            Some(size) => size,
            None => match fetcher.lookup_object_size(identity).await {
                Some(size) => {
                    debug!("Object size from cache: identity={}, size={}", identity, size);
                    size
                }
                None => {
                    let (size, block) =
                        discover_size(&geometry, fetcher, identity, request.range.as_ref())
                            .await?;
                    seed = block;
                    size
                }
            },
        };

        let range = request
            .range
            .map(|spec| spec.resolve(object_size))
            .transpose()?;
        let plan = geometry.plan(object_size, range)?;

        if request.head_only {
            return self.assembler.head_response(&plan);
        }

        // A discovery block outside the plan (cold suffix requests) is dropped
        // without being cached.
        if let Some(block) = &seed {
            if plan.position_of(block.index).is_some() {
                fetcher.cache_block(identity, block).await;
            }
        }

        let fetch_started = Instant::now();
        let blocks = match orchestrator.fetch_all_seeded(identity, &plan, seed).await {
            Ok(blocks) => {
                self.metrics.record_fetch_duration(fetch_started.elapsed());
                blocks
            }
            Err(e) => {
                if e.is_size_change() {
                    warn!(
                        "Object changed at origin, dropping cached version: identity={}, error={}",
                        identity, e
                    );
                    fetcher
                        .invalidate_object(identity, geometry.total_blocks(object_size))
                        .await;
                    if geometry != self.geometry {
                        self.fetcher
                            .invalidate_object(identity, self.geometry.total_blocks(object_size))
                            .await;
                    }
                }
                return Err(e);
            }
        };

        self.assembler.assemble(&plan, &blocks)
    }

    /// Geometry and orchestrator for a request, honoring overrides when allowed
    fn pipeline_for(
        &self,
        overrides: &RequestOverrides,
    ) -> Result<(BlockGeometry, ParallelOrchestrator)> {
        if !self.config.allow_request_overrides || overrides.is_empty() {
            return Ok((self.geometry, self.orchestrator.clone()));
        }

        let block_size = overrides.block_size.unwrap_or(self.config.block_size);
        let max_parallel = overrides
            .max_parallel
            .unwrap_or(self.config.max_parallel_fetches);
        debug!(
            "Applying request overrides: block_size={}, max_parallel={}",
            block_size, max_parallel
        );

        let fetcher = if block_size == self.geometry.block_size() {
            Arc::clone(&self.fetcher)
        } else {
            Arc::new(self.fetcher.for_block_size(block_size))
        };
        Ok((
            BlockGeometry::new(block_size)?,
            ParallelOrchestrator::new(fetcher, max_parallel),
        ))
    }
}

/// Learn the object size from the origin
///
/// Fetches the block the request would need first so the plan can reuse it.
/// An origin that rejects the range but reports the complete length still
/// yields a size; the range check then produces the client's 416.
async fn discover_size(
    geometry: &BlockGeometry,
    fetcher: &BlockFetcher,
    identity: &str,
    range: Option<&RangeSpec>,
) -> Result<(u64, Option<FetchedBlock>)> {
    let span = geometry.discovery_span(range);
    debug!(
        "Discovering object size: identity={}, block={}",
        identity, span.index
    );

    let (size, block) = match fetcher
        .fetch_from_origin(identity, span.index, span.offset, span.length)
        .await
        .into_result()
    {
        Ok(block) => {
            let size = block.total_size.ok_or_else(|| {
                BlockError::InternalError("origin block without object size".to_string())
            })?;
            (size, Some(block))
        }
        Err(BlockError::OriginFetchFailed {
            kind:
                OriginErrorKind::RangeNotSatisfiable {
                    complete_length: Some(size),
                },
            ..
        }) => (size, None),
        Err(e) => return Err(e),
    };

    fetcher.remember_object_size(identity, size).await;
    Ok((size, block))
}
