//! Response assembler
//!
//! Stitches fetched blocks into the exact response body, trimming the first
//! and last block to the requested range, and builds the headers that
//! describe it. Bytes are passed through untouched; trimming uses
//! `Bytes::slice`, so no payload is copied until the body is flattened.

use crate::error::{BlockError, Result};
use crate::models::{BlockPlan, FetchedBlock};
use bytes::{Bytes, BytesMut};
use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, error};

/// A complete response ready to send
#[derive(Debug, Clone)]
pub struct AssembledResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Body segments in order; their concatenation is the response body
    pub body: Vec<Bytes>,
}

impl AssembledResponse {
    /// Number of body bytes across all segments
    pub fn body_len(&self) -> u64 {
        self.body.iter().map(|b| b.len() as u64).sum()
    }

    /// Flatten the body segments into one buffer
    pub fn body_bytes(&self) -> Bytes {
        match self.body.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            segments => {
                let mut buf = BytesMut::with_capacity(self.body_len() as usize);
                for segment in segments {
                    buf.extend_from_slice(segment);
                }
                buf.freeze()
            }
        }
    }
}

/// Builds client responses from block plans and fetched blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAssembler;

impl ResponseAssembler {
    pub fn new() -> Self {
        ResponseAssembler
    }

    /// Build status and headers for a plan
    ///
    /// 200 without `Content-Range` for whole-object requests, 206 with
    /// `Content-Range: bytes {start}-{end}/{size}` whenever a range was requested.
    pub fn build_response_header(&self, plan: &BlockPlan) -> Result<(StatusCode, HeaderMap)> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(plan.content_length()));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let status = match plan.range() {
            Some(range) => {
                let content_range =
                    format!("bytes {}-{}/{}", range.start, range.end, plan.object_size());
                headers.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&content_range).map_err(|e| {
                        BlockError::InternalError(format!("Invalid header value: {}", e))
                    })?,
                );
                StatusCode::PARTIAL_CONTENT
            }
            None => StatusCode::OK,
        };

        debug!(
            "Built response headers: status={}, content_length={}",
            status,
            plan.content_length()
        );
        Ok((status, headers))
    }

    /// Trim fetched blocks down to the planned byte range
    ///
    /// # Returns
    /// * `Ok(segments)` whose lengths sum to `plan.content_length()`
    /// * `Err(BlockError::InternalAssemblyMismatch)` if they do not
    pub fn trim_blocks(&self, plan: &BlockPlan, blocks: &[FetchedBlock]) -> Result<Vec<Bytes>> {
        if blocks.len() != plan.len() {
            return Err(BlockError::InternalError(format!(
                "plan has {} blocks but {} were supplied",
                plan.len(),
                blocks.len()
            )));
        }

        let last_pos = blocks.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(blocks.len());

        for (pos, (block, span)) in blocks.iter().zip(plan.blocks()).enumerate() {
            if block.index != span.index {
                return Err(BlockError::InternalError(format!(
                    "block {} supplied at plan position {} (expected block {})",
                    block.index, pos, span.index
                )));
            }

            let len = block.data.len();
            let start = if pos == 0 { plan.trim_start() as usize } else { 0 };
            let end = if pos == last_pos {
                plan.trim_end() as usize + 1
            } else {
                len
            };
            // Clamped so a short block shows up as a byte-count mismatch below
            let end = end.min(len);
            let start = start.min(end);
            segments.push(block.data.slice(start..end));
        }

        let actual: u64 = segments.iter().map(|s| s.len() as u64).sum();
        let expected = plan.content_length();
        if actual != expected {
            error!(
                "Assembly mismatch: assembled {} bytes, plan requires {} (blocks={:?})",
                actual,
                expected,
                plan.block_indices()
            );
            return Err(BlockError::InternalAssemblyMismatch { expected, actual });
        }

        Ok(segments)
    }

    /// Assemble the full response for a plan
    ///
    /// Only called once every block of the plan has been fetched.
    pub fn assemble(&self, plan: &BlockPlan, blocks: &[FetchedBlock]) -> Result<AssembledResponse> {
        let body = self.trim_blocks(plan, blocks)?;
        let (status, headers) = self.build_response_header(plan)?;
        Ok(AssembledResponse {
            status,
            headers,
            body,
        })
    }

    /// Response for a HEAD request: the GET headers with no body
    pub fn head_response(&self, plan: &BlockPlan) -> Result<AssembledResponse> {
        let (status, headers) = self.build_response_header(plan)?;
        Ok(AssembledResponse {
            status,
            headers,
            body: Vec::new(),
        })
    }

    /// Plain-text error response for a failed request
    ///
    /// 416 responses carry `Content-Range: bytes */{size}` when the size is known.
    pub fn error_response(&self, err: &BlockError) -> AssembledResponse {
        let status = StatusCode::from_u16(err.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Bytes::from(format!("{}\n", err));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            if let Some(size) = err.complete_length() {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                    headers.insert(CONTENT_RANGE, value);
                }
            }
        }

        AssembledResponse {
            status,
            headers,
            body: vec![body],
        }
    }
}
