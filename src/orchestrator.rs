//! Parallel Orchestrator
//!
//! Drives the fetch of every block in a plan with at most `max_parallel`
//! fetches outstanding. Results land in slots indexed by plan position, so
//! completion order never leaks into the response.
//!
//! Any failed block fails the whole request. After the first failure no new
//! block fetch is dispatched; fetches already in flight are drained so their
//! cache writes complete, and their bytes are dropped.

use crate::error::{BlockError, OriginErrorKind, Result};
use crate::fetcher::BlockFetcher;
use crate::models::{BlockPlan, BlockSpan, FetchOutcome, FetchedBlock};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of block fetches in flight per request
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Bounded-concurrency fetcher for whole block plans
#[derive(Clone)]
pub struct ParallelOrchestrator {
    fetcher: Arc<BlockFetcher>,
    max_parallel: usize,
}

impl ParallelOrchestrator {
    /// Create a new ParallelOrchestrator
    ///
    /// # Arguments
    /// * `fetcher` - Per-block fetcher shared by all tasks
    /// * `max_parallel` - Admission limit; values below 1 are treated as 1
    pub fn new(fetcher: Arc<BlockFetcher>, max_parallel: usize) -> Self {
        ParallelOrchestrator {
            fetcher,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn fetcher(&self) -> &Arc<BlockFetcher> {
        &self.fetcher
    }

    /// Fetch every block of a plan
    ///
    /// # Returns
    /// * `Ok(blocks)` in plan order when every block was fetched
    /// * `Err(BlockError)` with the first failure otherwise
    pub async fn fetch_all(&self, identity: &str, plan: &BlockPlan) -> Result<Vec<FetchedBlock>> {
        self.fetch_all_seeded(identity, plan, None).await
    }

    /// Fetch every block of a plan, reusing a block that was already fetched
    ///
    /// The seed is typically the block fetched to discover the object size.
    /// It is ignored when the plan does not contain its index.
    pub async fn fetch_all_seeded(
        &self,
        identity: &str,
        plan: &BlockPlan,
        seed: Option<FetchedBlock>,
    ) -> Result<Vec<FetchedBlock>> {
        let spans = plan.blocks();
        let object_size = plan.object_size();
        let mut slots: Vec<Option<FetchedBlock>> = vec![None; spans.len()];

        if let Some(block) = seed {
            if let Some(pos) = plan.position_of(block.index) {
                verify_block(&spans[pos], &block, object_size)?;
                debug!("Reusing discovery block {} at plan position {}", block.index, pos);
                slots[pos] = Some(block);
            }
        }

        let pending: Vec<(usize, BlockSpan)> = spans
            .iter()
            .copied()
            .enumerate()
            .filter(|(pos, _)| slots[*pos].is_none())
            .collect();
        let mut pending = pending.into_iter();
        let mut in_flight: JoinSet<(usize, BlockSpan, FetchOutcome)> = JoinSet::new();
        let mut first_error: Option<BlockError> = None;

        debug!(
            "Fetching {} blocks for identity={} with max_parallel={}",
            spans.len(),
            identity,
            self.max_parallel
        );

        loop {
            // Admission gate: top up to max_parallel unless the outcome is decided
            while first_error.is_none() && in_flight.len() < self.max_parallel {
                let Some((pos, span)) = pending.next() else {
                    break;
                };
                let fetcher = Arc::clone(&self.fetcher);
                let identity = identity.to_string();
                in_flight.spawn(async move {
                    let outcome = fetcher
                        .fetch(
                            &identity,
                            span.index,
                            span.offset,
                            span.length,
                            Some(object_size),
                        )
                        .await;
                    (pos, span, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let result = match joined {
                Ok((pos, span, outcome)) => outcome
                    .into_result()
                    .and_then(|block| verify_block(&span, &block, object_size).map(|_| block))
                    .map(|block| (pos, block)),
                Err(e) => Err(BlockError::InternalError(format!(
                    "block fetch task failed: {}",
                    e
                ))),
            };

            match result {
                Ok((pos, block)) => slots[pos] = Some(block),
                Err(e) if first_error.is_none() => {
                    warn!(
                        "Block fetch failed for identity={}, stopping dispatch: {}",
                        identity, e
                    );
                    first_error = Some(e);
                }
                Err(e) => debug!("Suppressing additional failure for identity={}: {}", identity, e),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(pos, slot)| {
                slot.ok_or_else(|| {
                    BlockError::InternalError(format!("no outcome for plan position {}", pos))
                })
            })
            .collect()
    }
}

/// Check a fetched block against its planned span and the plan's object size
fn verify_block(span: &BlockSpan, block: &FetchedBlock, object_size: u64) -> Result<()> {
    if let Some(actual) = block.total_size {
        if actual != object_size {
            return Err(BlockError::origin(
                span.index,
                OriginErrorKind::SizeChanged {
                    expected: object_size,
                    actual,
                },
            ));
        }
    }
    if block.index != span.index || block.data.len() as u64 != span.length {
        return Err(BlockError::origin(
            span.index,
            OriginErrorKind::Protocol(format!(
                "block {} has {} bytes, plan expects block {} with {} bytes",
                block.index,
                block.data.len(),
                span.index,
                span.length
            )),
        ));
    }
    Ok(())
}
