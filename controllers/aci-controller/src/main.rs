//! ACI Controller
//!
//! Reconciles Kubernetes state into Cisco ACI fabric objects:
//! - LoadBalancer Services: external addresses, per-node service endpoints
//!   and a policy-based-redirect service graph per service
//! - SnatPolicy: one shared SNAT redirect graph
//! - NetflowPolicy: flow exporter policies on the VMM domain
//!
//! Every Service is also published to the VMM inventory, and node fabric
//! attachments are tracked through an APIC subscription.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod names;
mod queue;
mod reconciler;
mod service_writer;
mod state;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        warn!("rustls crypto provider already installed: {:?}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting ACI Controller");

    let config = ControllerConfig::load()?;
    info!("Configuration:");
    info!("  Prefix: {}", config.aci_prefix);
    info!("  VMM domain: {}/{}", config.aci_vmm_type, config.aci_vmm_domain);
    info!("  VRF: {}/{}", config.aci_vrf_tenant, config.aci_vrf);
    info!("  APIC hosts: {}", config.apic_hosts.join(", "));
    info!("  APIC sync: {}", if config.apic_sync_enabled { "enabled" } else { "disabled" });

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
