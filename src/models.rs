//! Core data models for block slicing

use crate::error::{BlockError, OriginErrorKind, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An inclusive byte range resolved against a known object size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if `start <= end`
    /// * `Err(BlockError::RangeNotSatisfiable)` otherwise
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(BlockError::unsatisfiable(
                format!("start ({}) must be <= end ({})", start, end),
                None,
            ));
        }
        Ok(ByteRange { start, end })
    }

    /// Number of bytes covered by this range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Format as an HTTP Range header value ("bytes=start-end")
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A client byte-range request as written in the `Range` header, before the
/// object size is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=first-last`
    Closed { first: u64, last: u64 },
    /// `bytes=first-`
    Open { first: u64 },
    /// `bytes=-length`
    Suffix { length: u64 },
}

impl RangeSpec {
    /// Parse a single Range header value
    ///
    /// Only one range of the `bytes` unit is accepted. Anything else is
    /// reported as unsatisfiable rather than ignored.
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let spec = header
            .strip_prefix("bytes=")
            .ok_or_else(|| {
                BlockError::unsatisfiable(format!("range not bytes: {}", header), None)
            })?;

        if spec.contains(',') {
            return Err(BlockError::unsatisfiable("multiple ranges not supported", None));
        }

        let (first, last) = spec
            .split_once('-')
            .ok_or_else(|| {
                BlockError::unsatisfiable(format!("cannot parse range: {}", spec), None)
            })?;
        let (first, last) = (first.trim(), last.trim());

        let parse_bound = |value: &str, what: &str| -> Result<u64> {
            value.parse::<u64>().map_err(|e| {
                BlockError::unsatisfiable(format!("invalid range {}: {}", what, e), None)
            })
        };

        match (first.is_empty(), last.is_empty()) {
            (true, true) => Err(BlockError::unsatisfiable("empty range", None)),
            (true, false) => {
                let length = parse_bound(last, "suffix length")?;
                if length == 0 {
                    return Err(BlockError::unsatisfiable("zero-length suffix range", None));
                }
                Ok(RangeSpec::Suffix { length })
            }
            (false, true) => Ok(RangeSpec::Open {
                first: parse_bound(first, "lower bound")?,
            }),
            (false, false) => {
                let first = parse_bound(first, "lower bound")?;
                let last = parse_bound(last, "upper bound")?;
                if last < first {
                    return Err(BlockError::unsatisfiable(
                        format!("range upper bound {} lower than lower bound {}", last, first),
                        None,
                    ));
                }
                Ok(RangeSpec::Closed { first, last })
            }
        }
    }

    /// Parse all Range header field values of a request
    ///
    /// No field means a whole-object request; more than one field is malformed.
    pub fn from_header_values(values: &[&str]) -> Result<Option<Self>> {
        match values {
            [] => Ok(None),
            [value] => RangeSpec::parse(value).map(Some),
            _ => Err(BlockError::unsatisfiable("multiple range fields", None)),
        }
    }

    /// First requested byte, when it does not depend on the object size
    pub fn first(&self) -> Option<u64> {
        match self {
            RangeSpec::Closed { first, .. } | RangeSpec::Open { first } => Some(*first),
            RangeSpec::Suffix { .. } => None,
        }
    }

    /// Resolve against the object size
    ///
    /// A closed range reaching past the end of the object is unsatisfiable;
    /// it is never clamped.
    pub fn resolve(&self, object_size: u64) -> Result<ByteRange> {
        let unsatisfiable = |reason: String| BlockError::unsatisfiable(reason, Some(object_size));
        match *self {
            RangeSpec::Closed { first, last } => {
                if first > last {
                    return Err(unsatisfiable(format!("start {} > end {}", first, last)));
                }
                if first >= object_size {
                    return Err(unsatisfiable(format!(
                        "start {} is beyond object size {}",
                        first, object_size
                    )));
                }
                if last >= object_size {
                    return Err(unsatisfiable(format!(
                        "end {} is beyond object size {}",
                        last, object_size
                    )));
                }
                Ok(ByteRange { start: first, end: last })
            }
            RangeSpec::Open { first } => {
                if first >= object_size {
                    return Err(unsatisfiable(format!(
                        "start {} is beyond object size {}",
                        first, object_size
                    )));
                }
                Ok(ByteRange {
                    start: first,
                    end: object_size - 1,
                })
            }
            RangeSpec::Suffix { length } => {
                if object_size == 0 {
                    return Err(unsatisfiable("suffix range on empty object".to_string()));
                }
                let length = length.min(object_size);
                Ok(ByteRange {
                    start: object_size - length,
                    end: object_size - 1,
                })
            }
        }
    }
}

/// Parsed `Content-Range: bytes first-last/complete` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    pub complete_length: u64,
}

impl ContentRange {
    /// Parse a satisfied Content-Range value
    ///
    /// Unknown complete lengths (`/*`) are rejected since block boundaries
    /// cannot be validated without them.
    pub fn parse(value: &str) -> std::result::Result<Self, OriginErrorKind> {
        let protocol = |msg: String| OriginErrorKind::Protocol(msg);
        let value = value.trim();
        let field = value
            .strip_prefix("bytes ")
            .ok_or_else(|| protocol(format!("content-range not bytes: {}", value)))?;

        let (range, complete_length) = field
            .split_once('/')
            .ok_or_else(|| protocol(format!("cannot parse content-range: {}", value)))?;

        if complete_length.trim() == "*" {
            return Err(protocol(
                "unknown complete length in content-range not supported".to_string(),
            ));
        }
        let complete_length = complete_length
            .trim()
            .parse::<u64>()
            .map_err(|e| protocol(format!("content-range complete length: {}", e)))?;

        let (first, last) = range
            .split_once('-')
            .ok_or_else(|| protocol(format!("cannot parse range in content-range: {}", value)))?;
        let first = first
            .trim()
            .parse::<u64>()
            .map_err(|e| protocol(format!("content-range lower bound: {}", e)))?;
        let last = last
            .trim()
            .parse::<u64>()
            .map_err(|e| protocol(format!("content-range upper bound: {}", e)))?;

        if last < first {
            return Err(protocol(format!(
                "content-range upper bound {} lower than lower bound {}",
                last, first
            )));
        }
        if last >= complete_length {
            return Err(protocol(format!(
                "content-range upper bound {} not lower than complete length {}",
                last, complete_length
            )));
        }

        Ok(ContentRange {
            first,
            last,
            complete_length,
        })
    }

    /// Complete length from an unsatisfied-range value such as `bytes */1000`
    pub fn unsatisfied_length(value: &str) -> Option<u64> {
        value
            .trim()
            .strip_prefix("bytes */")
            .and_then(|n| n.trim().parse().ok())
    }

    /// Number of bytes the header claims the body carries
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Location of one fixed-size block inside an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSpan {
    /// Block index, 0-based
    pub index: u64,
    /// Byte offset of the block in the object (`index * block_size`)
    pub offset: u64,
    /// Block length; only the final block may be shorter than the block size
    pub length: u64,
}

/// Blocks needed to satisfy one request and how to trim the outer ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub(crate) object_size: u64,
    pub(crate) block_size: u64,
    pub(crate) range: Option<ByteRange>,
    pub(crate) blocks: Vec<BlockSpan>,
    pub(crate) trim_start: u64,
    pub(crate) trim_end: u64,
}

impl BlockPlan {
    /// Total object size the plan was validated against
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// The client's resolved range, `None` for a whole-object request
    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    /// Ordered, contiguous blocks to fetch
    pub fn blocks(&self) -> &[BlockSpan] {
        &self.blocks
    }

    pub fn block_indices(&self) -> Vec<u64> {
        self.blocks.iter().map(|b| b.index).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Offset inside the first block where the response body starts
    pub fn trim_start(&self) -> u64 {
        self.trim_start
    }

    /// Inclusive offset inside the last block where the response body ends
    pub fn trim_end(&self) -> u64 {
        self.trim_end
    }

    /// Whether the response is partial content (a Range was requested)
    pub fn is_partial(&self) -> bool {
        self.range.is_some()
    }

    /// Exact number of body bytes the plan produces
    pub fn content_length(&self) -> u64 {
        match self.range {
            Some(range) => range.size(),
            None => self.object_size,
        }
    }

    /// Position of a block index inside the plan
    pub fn position_of(&self, index: u64) -> Option<usize> {
        let first = self.blocks.first()?.index;
        if index < first {
            return None;
        }
        let pos = (index - first) as usize;
        (pos < self.blocks.len()).then_some(pos)
    }
}

/// Where a block's bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSource {
    Cache,
    Origin,
}

/// A block's payload once resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    pub index: u64,
    pub data: Bytes,
    pub source: BlockSource,
    /// Total object size as reported by the origin; `None` for cache hits
    pub total_size: Option<u64>,
}

/// Per-block result of a fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedBlock),
    Failed { index: u64, error: BlockError },
}

impl FetchOutcome {
    pub fn into_result(self) -> Result<FetchedBlock> {
        match self {
            FetchOutcome::Fetched(block) => Ok(block),
            FetchOutcome::Failed { error, .. } => Err(error),
        }
    }
}
