//! VirtualIP Controller
//!
//! Allocates virtual IP addresses for Services from GroupSegmentMapping pools
//! and exposes them through keepalived:
//! - VirtualIP: requests an address for a Service (optionally on a clone)
//! - GroupSegmentMapping: a CIDR pool bound to a keepalived group
//! - IP: one object per allocated address, created atomically as the claim

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod server;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Install rustls crypto provider before any TLS client is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    initialize_logging();
    info!("Starting VirtualIP Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  KeepalivedGroup namespace: {}", config.keepalived_group_namespace);
    info!("  Exclude subnet boundaries: {}", config.exclude_subnet_boundaries);
    info!("  Probe address: {}", config.probe_addr);
    info!("  Concurrency: {}", config.reconcile_concurrency);
    info!("  Debounce: {:?}", config.debounce);
    info!("  Backoff: {}s..{}s", config.backoff_min_seconds, config.backoff_max_seconds);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

/// Sets up tracing; `RUST_LOG` filters (default `info`), `RUST_LOG_FORMAT=json` switches to JSON lines.
fn initialize_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
        }
    }
}
