//! VirtualMachine Controller
//!
//! Reconciles `VirtualMachine` custom resources against VMware Aria Automation
//! (vRealize Automation): machines are created, mirrored back into the
//! resource, and deleted behind a finalizer.

mod backoff;
mod config;
mod controller;
mod error;
mod reconciler;
mod server;
mod status;
mod store;
mod tracker;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use crds::KindRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both use rustls; pick the provider once for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting VirtualMachine Controller");

    let config = ControllerConfig::load()?;
    let registry = KindRegistry::with_defaults();

    info!("Configuration:");
    info!("  Aria Automation URL: {}", config.vra_url);
    info!("  Insecure TLS: {}", config.insecure);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!(
        "  Requeue: {}s (max {}s), resync: {}s",
        config.requeue.as_secs(),
        config.max_requeue.as_secs(),
        config.resync.as_secs()
    );
    info!("  Registered kinds: {}", registry.len());

    let controller = Controller::new(config, registry).await?;
    controller.run().await?;

    Ok(())
}
