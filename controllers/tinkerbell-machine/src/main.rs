//! Tinkerbell Machine Controller
//!
//! Cluster API infrastructure controller for bare metal. Each
//! TinkerbellMachine is bound to one unowned Hardware object, provisioned
//! through a Tinkerbell Workflow (with optional BMC power cycling and IPAM
//! address assignment) and reported ready with the provider ID
//! `tinkerbell://<namespace>/<hardware>`. Deleting the machine releases the
//! Hardware for reuse.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("failed to install the rustls crypto provider");
    }

    info!("Starting Tinkerbell Machine Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  Metadata URL: {}", config.metadata_url);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
