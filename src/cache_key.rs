//! Cache key generation for blocks
//!
//! Keys depend only on the object identity, the block size and the block
//! index. The client's range never enters the key, so any two requests
//! touching the same block share one cache entry.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

/// How the object identity is written into a key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// Identity embedded verbatim
    #[default]
    Plain,
    /// Identity replaced by its xxh3-128 digest, bounding key length
    Hashed,
}

/// Deterministic mapping from (object identity, block index) to a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyGenerator {
    block_size: u64,
    format: KeyFormat,
    namespace: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new(block_size: u64) -> Self {
        CacheKeyGenerator {
            block_size,
            format: KeyFormat::Plain,
            namespace: None,
        }
    }

    pub fn with_format(mut self, format: KeyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Same key scheme for a different block size
    pub fn for_block_size(&self, block_size: u64) -> Self {
        CacheKeyGenerator {
            block_size,
            ..self.clone()
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Key for one block of an object
    ///
    /// Format: `[{namespace}/]{identity}:block:{block_size}:{index}`. The
    /// trailing fields have a fixed shape, so the key can be split from the
    /// right and two distinct (identity, index) pairs never produce the same
    /// string.
    pub fn key(&self, identity: &str, block_index: u64) -> String {
        format!(
            "{}:block:{}:{}",
            self.object_part(identity),
            self.block_size,
            block_index
        )
    }

    /// Key under which the object's total size is remembered
    pub fn size_key(&self, identity: &str) -> String {
        format!("{}:size", self.object_part(identity))
    }

    fn object_part(&self, identity: &str) -> String {
        let identity = match self.format {
            KeyFormat::Plain => identity.to_string(),
            KeyFormat::Hashed => format!("{:032x}", xxh3_128(identity.as_bytes())),
        };
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, identity),
            None => identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        let keys = CacheKeyGenerator::new(1_048_576);
        assert_eq!(
            keys.key("http://origin/video.mp4", 3),
            "http://origin/video.mp4:block:1048576:3"
        );
        assert_eq!(keys.size_key("http://origin/video.mp4"), "http://origin/video.mp4:size");
    }

    #[test]
    fn test_distinct_blocks_distinct_keys() {
        let keys = CacheKeyGenerator::new(1024);
        assert_ne!(keys.key("/a", 0), keys.key("/a", 1));
        assert_ne!(keys.key("/a", 1), keys.key("/b", 1));
        assert_ne!(keys.key("/a", 1), keys.for_block_size(2048).key("/a", 1));
    }

    #[test]
    fn test_hashed_key_is_stable_and_bounded() {
        let keys = CacheKeyGenerator::new(1024).with_format(KeyFormat::Hashed);
        let long_identity = format!("http://origin/{}", "x".repeat(4096));
        let key = keys.key(&long_identity, 7);
        assert_eq!(key, keys.key(&long_identity, 7));
        assert!(key.len() < 64);
        assert!(key.ends_with(":block:1024:7"));
    }

    #[test]
    fn test_namespace_prefix() {
        let keys = CacheKeyGenerator::new(10).with_namespace("edge");
        assert_eq!(keys.key("/f", 0), "edge//f:block:10:0");
    }

    #[test]
    fn test_size_key_never_equals_block_key() {
        let keys = CacheKeyGenerator::new(10);
        assert_ne!(keys.size_key("/f"), keys.key("/f", 0));
    }
}
