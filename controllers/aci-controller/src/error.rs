//! Controller-specific error types.
//!
//! Library errors (Kubernetes, APIC, address pools) are wrapped as-is; the
//! remaining variants cover configuration and outbound writes.

use apic_client::ApicError;
use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ACI Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// APIC API error
    #[error("APIC error: {0}")]
    Apic(#[from] ApicError),

    /// Address pool error
    #[error("IPAM error: {0}")]
    Ipam(#[from] IpamError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// Writing back to the Kubernetes API failed
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
