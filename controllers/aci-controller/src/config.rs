//! Controller configuration.
//!
//! Loaded from a YAML file (`ACI_CONTROLLER_CONFIG`, default
//! `/etc/aci-controller/config.yaml`). APIC credentials may instead come from
//! the environment so they can be mounted from a Secret:
//!
//! - `APIC_HOSTS`: comma-separated controller addresses
//! - `APIC_USERNAME`
//! - `APIC_PASSWORD`

use crate::error::ControllerError;
use ipam::IpRange;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

pub const CONFIG_PATH_ENV: &str = "ACI_CONTROLLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/aci-controller/config.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControllerConfig {
    /// Prefix for every fabric object name this controller owns
    pub aci_prefix: String,
    /// Tenant holding the VRF, service BD and service graph objects
    pub aci_vrf_tenant: String,
    pub aci_vrf: String,
    pub aci_l3out: String,
    /// External networks that consume every service contract
    pub aci_ext_networks: Vec<String>,

    pub aci_vmm_type: String,
    pub aci_vmm_domain: String,
    pub aci_vmm_controller: String,

    /// Physical domain of the service device cluster
    pub aci_service_phys_dom: String,
    /// Encapsulation of the service interface, e.g. "vlan-4001"
    pub aci_service_encap: String,

    pub service_ip_pool: Vec<IpRange>,
    pub static_service_ip_pool: Vec<IpRange>,
    pub node_service_ip_pool: Vec<IpRange>,
    /// Gateway subnets placed on the service bridge domain
    pub node_service_subnets: Vec<String>,

    pub allocate_service_ips: bool,
    /// Write service graphs to the fabric. When false only visibility
    /// objects are written.
    pub apic_sync_enabled: bool,

    pub apic_hosts: Vec<String>,
    pub apic_username: String,
    pub apic_password: String,
    pub apic_insecure: bool,
    /// Poll interval for opflexODev subscriptions
    pub apic_refresh_seconds: u64,

    pub service_workers: usize,
    pub metrics_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            aci_prefix: "kube".to_string(),
            aci_vrf_tenant: "common".to_string(),
            aci_vrf: String::new(),
            aci_l3out: String::new(),
            aci_ext_networks: Vec::new(),
            aci_vmm_type: "Kubernetes".to_string(),
            aci_vmm_domain: String::new(),
            aci_vmm_controller: String::new(),
            aci_service_phys_dom: String::new(),
            aci_service_encap: String::new(),
            service_ip_pool: Vec::new(),
            static_service_ip_pool: Vec::new(),
            node_service_ip_pool: Vec::new(),
            node_service_subnets: Vec::new(),
            allocate_service_ips: true,
            apic_sync_enabled: true,
            apic_hosts: Vec::new(),
            apic_username: String::new(),
            apic_password: String::new(),
            apic_insecure: false,
            apic_refresh_seconds: 30,
            service_workers: 2,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ControllerConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, ControllerError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Override APIC connection settings from the environment.
    ///
    /// `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hosts) = lookup("APIC_HOSTS") {
            self.apic_hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(username) = lookup("APIC_USERNAME") {
            self.apic_username = username;
        }
        if let Some(password) = lookup("APIC_PASSWORD") {
            self.apic_password = password;
        }
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.aci_prefix.is_empty() {
            return Err(ControllerError::InvalidConfig("aci-prefix must not be empty".to_string()));
        }
        if self.apic_hosts.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "at least one APIC host is required (apic-hosts or APIC_HOSTS)".to_string(),
            ));
        }
        if self.apic_username.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "APIC username is required (apic-username or APIC_USERNAME)".to_string(),
            ));
        }
        if self.aci_vmm_domain.is_empty() || self.aci_vmm_controller.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "aci-vmm-domain and aci-vmm-controller are required".to_string(),
            ));
        }
        if self.service_workers == 0 {
            return Err(ControllerError::InvalidConfig("service-workers must be at least 1".to_string()));
        }
        if self.apic_refresh_seconds == 0 {
            return Err(ControllerError::InvalidConfig("apic-refresh-seconds must be at least 1".to_string()));
        }
        if self.apic_sync_enabled {
            for (field, value) in [
                ("aci-vrf", &self.aci_vrf),
                ("aci-l3out", &self.aci_l3out),
                ("aci-service-phys-dom", &self.aci_service_phys_dom),
                ("aci-service-encap", &self.aci_service_encap),
            ] {
                if value.is_empty() {
                    return Err(ControllerError::InvalidConfig(format!(
                        "{} is required when apic-sync-enabled is set",
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Read the config file named by `ACI_CONTROLLER_CONFIG`, apply the
    /// environment and validate.
    pub fn load() -> Result<Self, ControllerError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_file(Path::new(&path))?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}
