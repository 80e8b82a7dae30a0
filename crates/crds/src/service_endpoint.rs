//! Per-node service endpoint annotation
//!
//! The controller persists the forwarding identity it gave each node for a
//! load-balanced service in a service annotation, so MACs and node addresses
//! survive a restart:
//!
//! ```json
//! {"node-1": {"mac": "02:8c:3a:10:ff:01", "ipv4": "10.6.0.2"}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Annotation key holding the node -> endpoint table
pub const SERVICE_EP_ANNOTATION: &str = "opflex.cisco.com/service-endpoint";

/// One node's forwarding identity for a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<Ipv6Addr>,
}

/// Node name -> endpoint
pub type ServiceEndpointMap = BTreeMap<String, ServiceEndpoint>;

impl ServiceEndpoint {
    /// True when `mac` is six hex octets separated by ':' or '-'
    pub fn has_valid_mac(&self) -> bool {
        parse_mac(&self.mac).is_some()
    }
}

/// Parse a colon or dash separated 48-bit MAC
pub fn parse_mac(mac: &str) -> Option<[u8; 6]> {
    let sep = if mac.contains('-') { '-' } else { ':' };
    let mut out = [0u8; 6];
    let mut parts = mac.split(sep);
    for byte in &mut out {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Format a MAC the way the annotation stores it
pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

pub fn parse_annotation(value: &str) -> Result<ServiceEndpointMap, serde_json::Error> {
    serde_json::from_str(value)
}

pub fn to_annotation(eps: &ServiceEndpointMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(eps)
}
