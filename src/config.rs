//! Configuration management for the block slice proxy

use crate::cache_key::KeyFormat;
use crate::error::{BlockError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockSliceConfig {
    /// Size of each cached block in bytes (default: 1MiB)
    /// Valid range: 4KiB to 64MiB
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Maximum number of block fetches in flight per request (default: 5)
    #[serde(default = "default_max_parallel")]
    pub max_parallel_fetches: usize,

    /// Address the HTTP front end listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Origin connection settings
    #[serde(default)]
    pub origin: OriginConfig,

    /// Block cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// How object identities are written into cache keys
    #[serde(default)]
    pub key_format: KeyFormat,

    /// Optional prefix separating this deployment's keys in a shared cache
    #[serde(default)]
    pub key_namespace: Option<String>,

    /// Honor the `x-sc-conf` request header (default: false)
    #[serde(default)]
    pub allow_request_overrides: bool,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Origin connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OriginConfig {
    /// Base URL that request paths are appended to
    #[serde(default = "default_origin_base_url")]
    pub base_url: String,

    /// Host header sent to the origin instead of the one in `base_url`
    #[serde(default)]
    pub host_header: Option<String>,

    /// Timeout for one origin range request in seconds (default: 30)
    #[serde(default = "default_origin_timeout")]
    pub timeout_secs: u64,
}

/// Block cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Whether blocks are cached at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Block time-to-live in seconds (default: 3600)
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Memory budget for cached blocks in bytes (default: 256MiB)
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: usize,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

// Default value functions for serde
fn default_block_size() -> u64 {
    1024 * 1024
}

fn default_max_parallel() -> usize {
    crate::orchestrator::DEFAULT_MAX_PARALLEL
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_origin_base_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_origin_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_size() -> usize {
    256 * 1024 * 1024
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for OriginConfig {
    fn default() -> Self {
        OriginConfig {
            base_url: default_origin_base_url(),
            host_header: None,
            timeout_secs: default_origin_timeout(),
        }
    }
}

impl OriginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: default_true(),
            ttl_secs: default_cache_ttl(),
            max_size_bytes: default_cache_max_size(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

impl Default for BlockSliceConfig {
    fn default() -> Self {
        BlockSliceConfig {
            block_size: default_block_size(),
            max_parallel_fetches: default_max_parallel(),
            listen_address: default_listen_address(),
            origin: OriginConfig::default(),
            cache: CacheConfig::default(),
            key_format: KeyFormat::default(),
            key_namespace: None,
            allow_request_overrides: false,
            metrics_endpoint: None,
        }
    }
}

impl BlockSliceConfig {
    pub const MIN_BLOCK_SIZE: u64 = 4 * 1024;
    pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
    pub const MAX_PARALLEL: usize = 64;

    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(BlockSliceConfig)` if loading and validation succeed
    /// * `Err(BlockError::ConfigError)` if the file cannot be read or is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            BlockError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: BlockSliceConfig = serde_yaml::from_str(content).map_err(|e| {
            BlockError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - block_size must be between 4KiB and 64MiB
    /// - max_parallel_fetches must be between 1 and 64
    /// - origin.base_url must be an http(s) URL
    /// - origin.timeout_secs must be > 0
    /// - cache.ttl_secs and cache.max_size_bytes must be > 0 when caching is enabled
    /// - cache.max_size_bytes must hold at least one block
    pub fn validate(&self) -> Result<()> {
        if self.block_size < Self::MIN_BLOCK_SIZE || self.block_size > Self::MAX_BLOCK_SIZE {
            return Err(BlockError::ConfigError(format!(
                "block_size must be between {}KiB and {}MiB, got {} bytes",
                Self::MIN_BLOCK_SIZE / 1024,
                Self::MAX_BLOCK_SIZE / (1024 * 1024),
                self.block_size
            )));
        }

        if self.max_parallel_fetches == 0 || self.max_parallel_fetches > Self::MAX_PARALLEL {
            return Err(BlockError::ConfigError(format!(
                "max_parallel_fetches must be between 1 and {}, got {}",
                Self::MAX_PARALLEL,
                self.max_parallel_fetches
            )));
        }

        if !(self.origin.base_url.starts_with("http://")
            || self.origin.base_url.starts_with("https://"))
        {
            return Err(BlockError::ConfigError(format!(
                "origin.base_url must start with http:// or https://, got '{}'",
                self.origin.base_url
            )));
        }

        if self.origin.timeout_secs == 0 {
            return Err(BlockError::ConfigError(
                "origin.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.cache.enabled {
            if self.cache.ttl_secs == 0 {
                return Err(BlockError::ConfigError(
                    "cache.ttl_secs must be greater than 0 when caching is enabled".to_string(),
                ));
            }
            if (self.cache.max_size_bytes as u64) < self.block_size {
                return Err(BlockError::ConfigError(format!(
                    "cache.max_size_bytes ({}) must hold at least one block of {} bytes",
                    self.cache.max_size_bytes, self.block_size
                )));
            }
        }

        Ok(())
    }

    /// Create a configuration with custom block size and parallelism
    pub fn new(block_size: u64, max_parallel_fetches: usize) -> Result<Self> {
        let config = BlockSliceConfig {
            block_size,
            max_parallel_fetches,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BlockSliceConfig::default();
        assert_eq!(config.block_size, 1024 * 1024);
        assert_eq!(config.max_parallel_fetches, 5);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_size_bounds() {
        assert!(BlockSliceConfig::new(1024, 5).is_err());
        assert!(BlockSliceConfig::new(128 * 1024 * 1024, 5).is_err());
        assert!(BlockSliceConfig::new(64 * 1024, 5).is_ok());
    }

    #[test]
    fn test_parallelism_bounds() {
        assert!(BlockSliceConfig::new(1024 * 1024, 0).is_err());
        assert!(BlockSliceConfig::new(1024 * 1024, 65).is_err());
        assert!(BlockSliceConfig::new(1024 * 1024, 1).is_ok());
    }

    #[test]
    fn test_origin_validation() {
        let mut config = BlockSliceConfig::default();
        config.origin.base_url = "ftp://origin".to_string();
        assert!(config.validate().is_err());

        let mut config = BlockSliceConfig::default();
        config.origin.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_validation() {
        let mut config = BlockSliceConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());
        config.cache.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = BlockSliceConfig::default();
        config.cache.max_size_bytes = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = BlockSliceConfig::from_yaml(
            "block_size: 2097152\n\
             key_format: hashed\n\
             origin:\n  base_url: \"https://cdn.example.com\"\n",
        )
        .unwrap();
        assert_eq!(config.block_size, 2 * 1024 * 1024);
        assert_eq!(config.key_format, KeyFormat::Hashed);
        assert_eq!(config.origin.base_url, "https://cdn.example.com");
        assert_eq!(config.origin.timeout_secs, 30);
        assert_eq!(config.max_parallel_fetches, 5);
    }
}
