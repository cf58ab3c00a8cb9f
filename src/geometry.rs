//! Block Geometry
//!
//! Maps an object size, a block size and an optional byte range onto the
//! ordered list of fixed-size blocks covering that range. Every tier that
//! caches blocks must compute the same boundaries, so this module is pure
//! arithmetic with no configuration lookups of its own.

use crate::error::{BlockError, Result};
use crate::models::{BlockPlan, BlockSpan, ByteRange, RangeSpec};
use tracing::debug;

/// Block arithmetic for one block size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    block_size: u64,
}

impl BlockGeometry {
    /// Create a new BlockGeometry
    ///
    /// # Returns
    /// * `Err(BlockError::ConfigError)` if `block_size` is 0
    pub fn new(block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(BlockError::ConfigError(
                "block_size must be greater than 0".to_string(),
            ));
        }
        Ok(BlockGeometry { block_size })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks needed to cover an object
    pub fn total_blocks(&self, object_size: u64) -> u64 {
        object_size.div_ceil(self.block_size)
    }

    /// Index of the block holding a byte offset
    pub fn block_index(&self, offset: u64) -> u64 {
        offset / self.block_size
    }

    /// Span of a block within an object of known size
    ///
    /// The final block is shortened to `object_size mod block_size` unless the
    /// size is an exact multiple.
    pub fn block_span(&self, index: u64, object_size: u64) -> BlockSpan {
        let offset = index * self.block_size;
        let length = object_size
            .saturating_sub(offset)
            .min(self.block_size);
        BlockSpan {
            index,
            offset,
            length,
        }
    }

    /// Block to fetch first when the object size is still unknown
    ///
    /// This is the block holding the range start; whole-object and suffix
    /// requests start at block 0. The span is a full block since the real
    /// length is only known once the origin reports the object size.
    ///
    /// A suffix request cannot know which block holds its start, so its
    /// discovery block is often outside the plan. That block is then fetched
    /// only for its size and is not cached.
    pub fn discovery_span(&self, range: Option<&RangeSpec>) -> BlockSpan {
        let index = range
            .and_then(RangeSpec::first)
            .map(|first| self.block_index(first))
            .unwrap_or(0);
        BlockSpan {
            index,
            offset: index * self.block_size,
            length: self.block_size,
        }
    }

    /// Compute the block plan for a request
    ///
    /// # Arguments
    /// * `object_size` - Total size of the object in bytes
    /// * `range` - Resolved client range, `None` for the whole object
    ///
    /// # Returns
    /// * `Ok(BlockPlan)` with contiguous, strictly increasing block indices
    /// * `Err(BlockError::RangeNotSatisfiable)` if the range is out of bounds
    pub fn plan(&self, object_size: u64, range: Option<ByteRange>) -> Result<BlockPlan> {
        let block_size = self.block_size;

        let (start, end) = match range {
            Some(range) => {
                if range.start > range.end {
                    return Err(BlockError::unsatisfiable(
                        format!("start {} > end {}", range.start, range.end),
                        Some(object_size),
                    ));
                }
                if range.start >= object_size {
                    return Err(BlockError::unsatisfiable(
                        format!("start {} is beyond object size {}", range.start, object_size),
                        Some(object_size),
                    ));
                }
                if range.end >= object_size {
                    return Err(BlockError::unsatisfiable(
                        format!("end {} is beyond object size {}", range.end, object_size),
                        Some(object_size),
                    ));
                }
                (range.start, range.end)
            }
            None if object_size == 0 => {
                debug!("Object size is 0, returning empty block plan");
                return Ok(BlockPlan {
                    object_size,
                    block_size,
                    range: None,
                    blocks: Vec::new(),
                    trim_start: 0,
                    trim_end: 0,
                });
            }
            None => (0, object_size - 1),
        };

        let first_block = start / block_size;
        let last_block = end / block_size;
        let blocks: Vec<BlockSpan> = (first_block..=last_block)
            .map(|index| self.block_span(index, object_size))
            .collect();

        let plan = BlockPlan {
            object_size,
            block_size,
            range,
            blocks,
            trim_start: start % block_size,
            trim_end: end % block_size,
        };

        debug!(
            "Planned blocks {}..={} for bytes {}-{} (object_size={}, block_size={}, trim={}/{})",
            first_block,
            last_block,
            start,
            end,
            object_size,
            block_size,
            plan.trim_start,
            plan.trim_end
        );

        Ok(plan)
    }
}

/// Compute a block plan without constructing a [`BlockGeometry`]
pub fn plan(object_size: u64, block_size: u64, range: Option<ByteRange>) -> Result<BlockPlan> {
    BlockGeometry::new(block_size)?.plan(object_size, range)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1_000_000;

    #[test]
    fn test_zero_block_size_rejected() {
        assert!(BlockGeometry::new(0).is_err());
        assert!(plan(100, 0, None).is_err());
    }

    #[test]
    fn test_total_blocks() {
        let geometry = BlockGeometry::new(1024).unwrap();
        assert_eq!(geometry.total_blocks(4096), 4);
        assert_eq!(geometry.total_blocks(4097), 5);
        assert_eq!(geometry.total_blocks(512), 1);
        assert_eq!(geometry.total_blocks(0), 0);
    }

    #[test]
    fn test_whole_object_plan() {
        let plan = plan(2_500_000, MB, None).unwrap();
        assert_eq!(plan.block_indices(), vec![0, 1, 2]);
        assert_eq!(plan.blocks()[2].offset, 2_000_000);
        assert_eq!(plan.blocks()[2].length, 500_000);
        assert_eq!(plan.trim_start(), 0);
        assert_eq!(plan.trim_end(), 499_999);
        assert_eq!(plan.content_length(), 2_500_000);
        assert!(!plan.is_partial());
    }

    #[test]
    fn test_exact_multiple_last_block_is_full() {
        let plan = plan(3 * MB, MB, None).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.blocks()[2].length, MB);
        assert_eq!(plan.trim_end(), MB - 1);
    }

    #[test]
    fn test_range_across_blocks() {
        let range = ByteRange::new(900_000, 1_999_999).unwrap();
        let plan = plan(2_500_000, MB, Some(range)).unwrap();
        assert_eq!(plan.block_indices(), vec![0, 1]);
        assert_eq!(plan.trim_start(), 900_000);
        assert_eq!(plan.trim_end(), 999_999);
        assert_eq!(plan.content_length(), 1_100_000);
        assert!(plan.is_partial());
    }

    #[test]
    fn test_range_inside_one_block() {
        let range = ByteRange::new(1_200_000, 1_200_099).unwrap();
        let plan = plan(2_500_000, MB, Some(range)).unwrap();
        assert_eq!(plan.block_indices(), vec![1]);
        assert_eq!(plan.trim_start(), 200_000);
        assert_eq!(plan.trim_end(), 200_099);
    }

    #[test]
    fn test_unsatisfiable_ranges() {
        let err = plan(1000, 100, Some(ByteRange { start: 1000, end: 1000 })).unwrap_err();
        assert_eq!(err.to_http_status(), 416);
        assert_eq!(err.complete_length(), Some(1000));

        assert!(plan(1000, 100, Some(ByteRange { start: 10, end: 1000 })).is_err());
        assert!(plan(1000, 100, Some(ByteRange { start: 20, end: 10 })).is_err());
        assert!(plan(0, 100, Some(ByteRange { start: 0, end: 0 })).is_err());
    }

    #[test]
    fn test_empty_object() {
        let plan = plan(0, 100, None).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.content_length(), 0);
    }

    #[test]
    fn test_position_of() {
        let range = ByteRange::new(250, 650).unwrap();
        let plan = plan(1000, 100, Some(range)).unwrap();
        assert_eq!(plan.block_indices(), vec![2, 3, 4, 5, 6]);
        assert_eq!(plan.position_of(2), Some(0));
        assert_eq!(plan.position_of(6), Some(4));
        assert_eq!(plan.position_of(1), None);
        assert_eq!(plan.position_of(7), None);
    }

    #[test]
    fn test_discovery_span() {
        let geometry = BlockGeometry::new(100).unwrap();
        assert_eq!(geometry.discovery_span(None).index, 0);
        let span = geometry.discovery_span(Some(&RangeSpec::Open { first: 250 }));
        assert_eq!(span.index, 2);
        assert_eq!(span.offset, 200);
        assert_eq!(span.length, 100);
        let suffix = geometry.discovery_span(Some(&RangeSpec::Suffix { length: 10 }));
        assert_eq!(suffix.index, 0);
    }

    #[test]
    fn test_blocks_contiguous_and_cover_object() {
        let plan = plan(5500, 1000, None).unwrap();
        assert_eq!(plan.blocks()[0].offset, 0);
        for pair in plan.blocks().windows(2) {
            assert_eq!(pair[0].index + 1, pair[1].index);
            assert_eq!(pair[0].offset + pair[0].length, pair[1].offset);
        }
        let last = plan.blocks().last().unwrap();
        assert_eq!(last.offset + last.length, 5500);
    }
}
