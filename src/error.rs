//! Error types for the block slice pipeline

use thiserror::Error;

/// Result type alias for block slice operations
pub type Result<T> = std::result::Result<T, BlockError>;

/// Why a single block could not be obtained from the origin
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginErrorKind {
    #[error("origin request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("origin returned client error {0}")]
    ClientError(u16),

    #[error("origin returned server error {0}")]
    ServerError(u16),

    #[error("origin reported range not satisfiable (complete length {complete_length:?})")]
    RangeNotSatisfiable { complete_length: Option<u64> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("object size changed from {expected} to {actual} during the request")]
    SizeChanged { expected: u64, actual: u64 },
}

/// Error types that can occur while serving a block-sliced response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Range not satisfiable: {reason}")]
    RangeNotSatisfiable {
        reason: String,
        complete_length: Option<u64>,
    },

    #[error("Origin fetch failed for block {block_index}: {kind}")]
    OriginFetchFailed { block_index: u64, kind: OriginErrorKind },

    #[error("Assembled {actual} bytes but the plan requires {expected}")]
    InternalAssemblyMismatch { expected: u64, actual: u64 },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for BlockError {
    fn from(err: std::io::Error) -> Self {
        BlockError::InternalError(err.to_string())
    }
}

impl BlockError {
    /// Create a RangeNotSatisfiable error
    pub fn unsatisfiable(reason: impl Into<String>, complete_length: Option<u64>) -> Self {
        BlockError::RangeNotSatisfiable {
            reason: reason.into(),
            complete_length,
        }
    }

    /// Create an OriginFetchFailed error for one block
    pub fn origin(block_index: u64, kind: OriginErrorKind) -> Self {
        BlockError::OriginFetchFailed { block_index, kind }
    }

    /// Convert error to HTTP status code
    ///
    /// - Unsatisfiable ranges become 416, including ones the origin rejects
    /// - Origin 4xx errors are passed through unchanged
    /// - Origin timeouts become 504, other origin failures 502
    /// - Everything else is an internal defect and becomes 500
    pub fn to_http_status(&self) -> u16 {
        match self {
            BlockError::RangeNotSatisfiable { .. } => 416,

            BlockError::OriginFetchFailed { kind, .. } => match kind {
                OriginErrorKind::Timeout => 504,
                OriginErrorKind::ClientError(status) => *status,
                OriginErrorKind::RangeNotSatisfiable { .. } => 416,
                OriginErrorKind::Connection(_)
                | OriginErrorKind::ServerError(_)
                | OriginErrorKind::Protocol(_)
                | OriginErrorKind::SizeChanged { .. } => 502,
            },

            BlockError::InternalAssemblyMismatch { .. } => 500,
            BlockError::ConfigError(_) => 500,
            BlockError::CacheError(_) => 500,
            BlockError::InternalError(_) => 500,
        }
    }

    /// Whether the origin object no longer has the size the request planned for
    pub fn is_size_change(&self) -> bool {
        matches!(
            self,
            BlockError::OriginFetchFailed {
                kind: OriginErrorKind::SizeChanged { .. },
                ..
            }
        )
    }

    /// Complete object length to advertise in a 416 `Content-Range`, if known
    pub fn complete_length(&self) -> Option<u64> {
        match self {
            BlockError::RangeNotSatisfiable {
                complete_length, ..
            } => *complete_length,
            BlockError::OriginFetchFailed {
                kind: OriginErrorKind::RangeNotSatisfiable { complete_length },
                ..
            } => *complete_length,
            _ => None,
        }
    }

    /// Whether this error points at a bug in this crate rather than at the
    /// client or the origin
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            BlockError::InternalAssemblyMismatch { .. } | BlockError::InternalError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BlockError::unsatisfiable("start > end", None).to_http_status(), 416);
        assert_eq!(
            BlockError::origin(3, OriginErrorKind::Timeout).to_http_status(),
            504
        );
        assert_eq!(
            BlockError::origin(0, OriginErrorKind::ServerError(503)).to_http_status(),
            502
        );
        assert_eq!(
            BlockError::origin(0, OriginErrorKind::ClientError(404)).to_http_status(),
            404
        );
        assert_eq!(
            BlockError::origin(
                1,
                OriginErrorKind::SizeChanged {
                    expected: 10,
                    actual: 20
                }
            )
            .to_http_status(),
            502
        );
        assert_eq!(
            BlockError::InternalAssemblyMismatch {
                expected: 10,
                actual: 9
            }
            .to_http_status(),
            500
        );
    }

    #[test]
    fn test_complete_length() {
        let err = BlockError::origin(
            4,
            OriginErrorKind::RangeNotSatisfiable {
                complete_length: Some(4096),
            },
        );
        assert_eq!(err.to_http_status(), 416);
        assert_eq!(err.complete_length(), Some(4096));
        assert_eq!(BlockError::CacheError("x".into()).complete_length(), None);
    }

    #[test]
    fn test_is_size_change() {
        let changed = BlockError::origin(
            2,
            OriginErrorKind::SizeChanged {
                expected: 10,
                actual: 12,
            },
        );
        assert!(changed.is_size_change());
        assert!(!BlockError::origin(2, OriginErrorKind::Timeout).is_size_change());
    }

    #[test]
    fn test_is_internal() {
        assert!(BlockError::InternalError("join".into()).is_internal());
        assert!(!BlockError::unsatisfiable("bad", Some(1)).is_internal());
    }
}
