//! APIC Watcher
//!
//! Subscribes to endpoint groups, contracts, filters and host-protection
//! policies on the ACI fabric and keeps a normalized policy intent
//! database, served as JSON on `/intent`.

mod config;
mod dn;
mod error;
mod intent_db;
mod models;
mod server;
mod watcher;

#[cfg(test)]
mod watcher_test;

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::watcher::ApicWatcher;
use apic_client::{ApicClient, ApicClientTrait};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), WatcherError> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        warn!("rustls crypto provider already installed: {:?}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting APIC Watcher");

    let config = WatcherConfig::from_env()?;
    info!("Configuration:");
    info!("  APIC hosts: {}", config.apic_hosts.join(", "));
    info!("  Policy tenant: {}", config.policy_tenant);
    info!("  Listen address: {}", config.listen_addr);

    let apic: Arc<dyn ApicClientTrait> = Arc::new(ApicClient::new(
        config.apic_hosts.clone(),
        config.apic_username.clone(),
        config.apic_password.clone(),
        config.apic_insecure,
    )?);

    let watcher = Arc::new(ApicWatcher::new(config.policy_tenant.clone()));
    let token = CancellationToken::new();

    let watch_handle = tokio::spawn(watcher.clone().run(
        apic,
        Duration::from_secs(config.refresh_seconds),
        token.clone(),
    ));
    let server_handle = tokio::spawn(server::serve(config.listen_addr, server::router(watcher), token.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for ctrl-c: {}", e),
    }
    token.cancel();

    if let Err(e) = watch_handle.await {
        warn!("Watcher task failed: {}", e);
    }
    match server_handle.await {
        Ok(result) => result?,
        Err(e) => warn!("Intent server task failed: {}", e),
    }

    info!("APIC Watcher stopped");
    Ok(())
}
