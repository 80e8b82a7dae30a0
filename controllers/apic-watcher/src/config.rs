//! Watcher configuration, read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `APIC_HOSTS` | required, comma separated |
//! | `APIC_USERNAME` | required |
//! | `APIC_PASSWORD` | empty |
//! | `APIC_INSECURE` | `false` |
//! | `ACI_POLICY_TENANT` | `kube` |
//! | `APIC_REFRESH_SECONDS` | `30` |
//! | `WATCHER_LISTEN_ADDR` | `0.0.0.0:8080` |

use crate::error::WatcherError;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub apic_hosts: Vec<String>,
    pub apic_username: String,
    pub apic_password: String,
    pub apic_insecure: bool,
    /// Tenant holding the host-protection policies
    pub policy_tenant: String,
    pub refresh_seconds: u64,
    pub listen_addr: SocketAddr,
}

impl WatcherConfig {
    pub fn from_env() -> Result<Self, WatcherError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WatcherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let apic_hosts: Vec<String> = lookup("APIC_HOSTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if apic_hosts.is_empty() {
            return Err(WatcherError::InvalidConfig(
                "APIC_HOSTS environment variable is required".to_string(),
            ));
        }

        let apic_username = lookup("APIC_USERNAME")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| WatcherError::InvalidConfig("APIC_USERNAME environment variable is required".to_string()))?;

        let refresh_seconds = match lookup("APIC_REFRESH_SECONDS") {
            Some(raw) => raw
                .parse()
                .map_err(|e| WatcherError::InvalidConfig(format!("APIC_REFRESH_SECONDS: {}", e)))?,
            None => 30,
        };
        if refresh_seconds == 0 {
            return Err(WatcherError::InvalidConfig("APIC_REFRESH_SECONDS must be positive".to_string()));
        }

        let listen_addr = lookup("WATCHER_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| WatcherError::InvalidConfig(format!("WATCHER_LISTEN_ADDR: {}", e)))?;

        Ok(Self {
            apic_hosts,
            apic_username,
            apic_password: lookup("APIC_PASSWORD").unwrap_or_default(),
            apic_insecure: lookup("APIC_INSECURE").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            policy_tenant: lookup("ACI_POLICY_TENANT")
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "kube".to_string()),
            refresh_seconds,
            listen_addr,
        })
    }
}
