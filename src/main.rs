//! Block Slice Server
//!
//! Loads configuration, sets up logging, and serves block-cached range
//! requests in front of a single origin.

use anyhow::Context;
use block_slice::{BlockProxy, BlockServer, BlockSliceConfig, MetricsEndpoint};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Main entry point for the block slice server
///
/// # Usage
/// ```bash
/// # Start with default config (block_slice.yaml)
/// block-slice
///
/// # Start with custom config
/// block-slice /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Block Slice Server");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "block_slice.yaml".to_string());
    info!("Loading configuration from: {}", config_path);

    let config = match BlockSliceConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            info!("  - Block size: {} bytes ({} KB)", cfg.block_size, cfg.block_size / 1024);
            info!("  - Max parallel fetches: {}", cfg.max_parallel_fetches);
            info!("  - Origin: {}", cfg.origin.base_url);
            info!("  - Cache enabled: {}", cfg.cache.enabled);
            info!("  - Cache TTL: {} seconds", cfg.cache.ttl_secs);
            info!("  - Key format: {:?}", cfg.key_format);
            info!("  - Request overrides: {}", cfg.allow_request_overrides);
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure the configuration file exists and is valid");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    let proxy = Arc::new(
        BlockProxy::from_config(Arc::clone(&config)).context("failed to build block proxy")?,
    );

    if let Some(metrics_config) = config.metrics_endpoint.as_ref().filter(|m| m.enabled) {
        let addr: SocketAddr = metrics_config
            .address
            .parse()
            .with_context(|| format!("invalid metrics address '{}'", metrics_config.address))?;
        let endpoint = MetricsEndpoint::new(Arc::clone(proxy.metrics()), addr);
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.listen_address))?;

    BlockServer::new(proxy, addr)
        .run()
        .await
        .context("server stopped")?;

    Ok(())
}
