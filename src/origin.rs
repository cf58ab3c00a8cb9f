//! Origin access for block fetches
//!
//! The fetcher talks to the origin through the [`Origin`] trait. [`HttpOrigin`]
//! is the range-capable HTTP implementation used by the server binary.

use crate::error::{BlockError, OriginErrorKind, Result};
use crate::models::{ByteRange, ContentRange};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Bytes returned by an origin for one range request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginResponse {
    /// Payload for `[offset, offset + data.len())`
    pub data: Bytes,
    /// Authoritative total size of the object
    pub total_size: u64,
}

/// Range-capable byte source
#[async_trait]
pub trait Origin: Send + Sync {
    /// Fetch `[offset, offset + length)` of an object
    ///
    /// The returned data may be shorter than `length` when the range runs past
    /// the end of the object.
    async fn fetch_range(
        &self,
        identity: &str,
        offset: u64,
        length: u64,
    ) -> std::result::Result<OriginResponse, OriginErrorKind>;
}

/// HTTP origin issuing `Range` requests with reqwest
pub struct HttpOrigin {
    http_client: Client,
    host_header: Option<String>,
}

impl HttpOrigin {
    /// Create a new HttpOrigin
    ///
    /// # Arguments
    /// * `timeout` - Per-request timeout; an expired timeout is an ordinary fetch failure
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| BlockError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpOrigin {
            http_client,
            host_header: None,
        })
    }

    /// Send a fixed `Host` header instead of the one derived from the URL
    pub fn with_host_header(mut self, host: impl Into<String>) -> Self {
        self.host_header = Some(host.into());
        self
    }

    fn build_range_request(&self, url: &str, range: &ByteRange) -> reqwest::RequestBuilder {
        let mut request = self.http_client.get(url).header("Range", range.to_header());
        if let Some(host) = &self.host_header {
            request = request.header("Host", host.as_str());
        }
        request
    }

    fn classify(err: &reqwest::Error) -> OriginErrorKind {
        if err.is_timeout() {
            OriginErrorKind::Timeout
        } else if err.is_builder() {
            OriginErrorKind::Protocol(format!("invalid origin request: {}", err))
        } else {
            OriginErrorKind::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch_range(
        &self,
        identity: &str,
        offset: u64,
        length: u64,
    ) -> std::result::Result<OriginResponse, OriginErrorKind> {
        if length == 0 {
            return Err(OriginErrorKind::Protocol("zero-length range request".to_string()));
        }
        let requested = ByteRange {
            start: offset,
            end: offset + length - 1,
        };

        let response = self
            .build_range_request(identity, &requested)
            .send()
            .await
            .map_err(|e| {
                warn!("Range request failed for url={}: {}", identity, e);
                Self::classify(&e)
            })?;

        let status = response.status();
        debug!(
            "Origin responded status={} for url={} range={}",
            status,
            identity,
            requested.to_header()
        );

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = response
                    .headers()
                    .get("content-range")
                    .ok_or_else(|| {
                        OriginErrorKind::Protocol(
                            "missing Content-Range header in 206 response".to_string(),
                        )
                    })?
                    .to_str()
                    .map_err(|e| {
                        OriginErrorKind::Protocol(format!("invalid Content-Range header: {}", e))
                    })
                    .and_then(ContentRange::parse)?;

                if content_range.first != requested.start || content_range.last > requested.end {
                    return Err(OriginErrorKind::Protocol(format!(
                        "content range {}-{} unexpected for request range {}-{}",
                        content_range.first, content_range.last, requested.start, requested.end
                    )));
                }

                let data = response.bytes().await.map_err(|e| Self::classify(&e))?;
                if data.len() as u64 != content_range.len() {
                    return Err(OriginErrorKind::Protocol(format!(
                        "body of {} bytes does not match content range {}-{}",
                        data.len(),
                        content_range.first,
                        content_range.last
                    )));
                }

                Ok(OriginResponse {
                    data,
                    total_size: content_range.complete_length,
                })
            }
            StatusCode::OK => {
                // Origin ignored the Range header and sent the whole object
                let body = response.bytes().await.map_err(|e| Self::classify(&e))?;
                let total_size = body.len() as u64;
                if offset >= total_size && total_size > 0 {
                    return Err(OriginErrorKind::RangeNotSatisfiable {
                        complete_length: Some(total_size),
                    });
                }
                let start = offset.min(total_size) as usize;
                let end = (offset + length).min(total_size) as usize;
                Ok(OriginResponse {
                    data: body.slice(start..end),
                    total_size,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let complete_length = response
                    .headers()
                    .get("content-range")
                    .and_then(|v| v.to_str().ok())
                    .and_then(ContentRange::unsatisfied_length);
                Err(OriginErrorKind::RangeNotSatisfiable { complete_length })
            }
            s if s.is_client_error() => Err(OriginErrorKind::ClientError(s.as_u16())),
            s if s.is_server_error() => Err(OriginErrorKind::ServerError(s.as_u16())),
            s => Err(OriginErrorKind::Protocol(format!(
                "unexpected status {} for range request",
                s
            ))),
        }
    }
}
