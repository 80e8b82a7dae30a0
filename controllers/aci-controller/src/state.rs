//! Shared controller state.
//!
//! Everything the forward pipeline mutates lives in [`ControllerState`],
//! owned by the reconciler behind a single `std::sync::Mutex`. The lock is
//! only held for in-memory bookkeeping; fabric and Kubernetes writes happen
//! after it is released.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use apic_client::{ApicObject, ApicSlice};
use crds::{
    PodSelector, PortRange, SERVICE_EP_ANNOTATION, ServiceEndpoint, ServiceEndpointMap, SnatPolicySpec,
    format_mac, parse_annotation,
};
use ipam::NetIps;
use k8s_openapi::api::core::v1::Service;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use tracing::{debug, warn};

/// One opflexODev record: where a node's uplink attaches to the fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricAttachment {
    pub dn: String,
    pub host_name: String,
    pub fabric_path: String,
}

impl FabricAttachment {
    pub fn from_odev(obj: &ApicObject) -> Self {
        Self {
            dn: obj.dn().to_string(),
            host_name: obj.attr_str("hostName").to_string(),
            fabric_path: obj.attr_str("fabricPathDn").to_string(),
        }
    }
}

/// Addresses held by one LoadBalancer service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMeta {
    /// Drawn from the dynamic pool
    pub ingress_ips: Vec<IpAddr>,
    /// Drawn from the static pool
    pub static_ingress_ips: Vec<IpAddr>,
    pub requested_ip: Option<IpAddr>,
    pub node_service_eps: ServiceEndpointMap,
}

impl ServiceMeta {
    /// Every ingress address, dynamic first
    pub fn ingress(&self) -> Vec<IpAddr> {
        self.ingress_ips.iter().chain(self.static_ingress_ips.iter()).copied().collect()
    }

    fn holds(&self, ip: IpAddr) -> bool {
        self.ingress_ips.contains(&ip) || self.static_ingress_ips.contains(&ip)
    }
}

/// Cached view of one SnatPolicy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnatPolicyEntry {
    pub snat_ips: Vec<String>,
    pub selector: PodSelector,
    pub port_ranges: Vec<PortRange>,
    pub protocols: Vec<String>,
}

impl From<&SnatPolicySpec> for SnatPolicyEntry {
    fn from(spec: &SnatPolicySpec) -> Self {
        Self {
            snat_ips: spec.snat_ip.clone(),
            selector: spec.selector.clone(),
            port_ranges: spec.port_range.clone(),
            protocols: spec.protocols.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ControllerState {
    pub service_ips: NetIps,
    pub static_service_ips: NetIps,
    pub node_service_ips: NetIps,
    /// Service key -> addresses it holds
    pub service_meta: HashMap<String, ServiceMeta>,
    /// Node name -> attachments, oldest first
    pub node_fabric_paths: BTreeMap<String, Vec<FabricAttachment>>,
    pub snat_policies: BTreeMap<String, SnatPolicyEntry>,
    /// Node name -> SNAT forwarding endpoint
    pub snat_node_eps: ServiceEndpointMap,
    /// Last SNAT graph written to the fabric
    pub snat_graph: Option<ApicSlice>,
}

impl ControllerState {
    /// Seed the pools from configuration. Static ranges are carved out of
    /// the dynamic pool so the two never overlap.
    pub fn new(config: &ControllerConfig) -> Result<Self, ControllerError> {
        let mut service_ips = NetIps::from_ranges(&config.service_ip_pool)?;
        let static_service_ips = NetIps::from_ranges(&config.static_service_ip_pool)?;
        service_ips.subtract(&static_service_ips);
        let node_service_ips = NetIps::from_ranges(&config.node_service_ip_pool)?;

        Ok(Self {
            service_ips,
            static_service_ips,
            node_service_ips,
            ..Self::default()
        })
    }

    /// Fabric path of the node's oldest attachment
    pub fn fabric_path_for_node(&self, node: &str) -> Option<&str> {
        self.node_fabric_paths
            .get(node)
            .and_then(|atts| atts.first())
            .map(|att| att.fabric_path.as_str())
    }

    pub fn ensure_service_meta(&mut self, key: &str) -> &mut ServiceMeta {
        self.service_meta.entry(key.to_string()).or_default()
    }

    /// Take ownership of addresses the service already advertises, from
    /// the dynamic pool when possible, else from the static pool.
    /// Addresses found in neither pool are left alone.
    pub fn adopt_ingress(&mut self, key: &str, ips: &[IpAddr]) {
        let meta = self.service_meta.entry(key.to_string()).or_default();
        for ip in ips {
            if meta.holds(*ip) {
                continue;
            }
            if self.service_ips.remove_ip(*ip) {
                meta.ingress_ips.push(*ip);
            } else if self.static_service_ips.remove_ip(*ip) {
                meta.static_ingress_ips.push(*ip);
            }
        }
    }

    /// Take ownership of annotated node endpoints.
    ///
    /// An entry is kept only when its MAC parses and all of its addresses
    /// are still free in the node pool. A half-claimed entry is rolled back.
    pub fn adopt_endpoints(&mut self, key: &str, annotated: &ServiceEndpointMap) {
        let meta = self.service_meta.entry(key.to_string()).or_default();
        for (node, ep) in annotated {
            if meta.node_service_eps.contains_key(node) {
                continue;
            }
            if !ep.has_valid_mac() {
                warn!("Invalid MAC {:?} in service endpoint of {} on node {}", ep.mac, key, node);
                continue;
            }
            if let Some(v4) = ep.ipv4 {
                if !self.node_service_ips.remove_ip(IpAddr::V4(v4)) {
                    warn!("IPv4 address {} not available for service endpoint of {}", v4, key);
                    continue;
                }
            }
            if let Some(v6) = ep.ipv6 {
                if !self.node_service_ips.remove_ip(IpAddr::V6(v6)) {
                    warn!("IPv6 address {} not available for service endpoint of {}", v6, key);
                    if let Some(v4) = ep.ipv4 {
                        self.node_service_ips.add_ip(IpAddr::V4(v4));
                    }
                    continue;
                }
            }
            meta.node_service_eps.insert(node.clone(), ep.clone());
        }
    }

    /// Rebuild the bookkeeping of a live service after a restart
    pub fn recover_service(&mut self, key: &str, service: &Service) {
        let is_lb = service.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
        if !is_lb {
            return;
        }
        let ips = status_ingress_ips(service);
        self.adopt_ingress(key, &ips);

        if let Some(raw) = service
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SERVICE_EP_ANNOTATION))
        {
            match parse_annotation(raw) {
                Ok(annotated) => self.adopt_endpoints(key, &annotated),
                Err(e) => warn!("Could not parse service endpoint annotation of {}: {}", key, e),
            }
        }
        debug!("Recovered service {}", key);
    }

    /// Return every address a service holds and forget it.
    /// Returns false when nothing was held.
    pub fn release_service(&mut self, key: &str) -> bool {
        let Some(meta) = self.service_meta.remove(key) else {
            return false;
        };
        self.service_ips.return_ips(&meta.ingress_ips);
        self.static_service_ips.return_ips(&meta.static_ingress_ips);
        for ep in meta.node_service_eps.values() {
            self.release_endpoint(ep);
        }
        true
    }

    /// New forwarding endpoint with a random locally administered unicast
    /// MAC and one node-pool address per family that has any left.
    /// `None` when both families are exhausted.
    pub fn allocate_endpoint(&mut self) -> Option<ServiceEndpoint> {
        let ipv4 = self.node_service_ips.v4.get_ip().ok().and_then(|ip| match ip {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        });
        let ipv6 = self.node_service_ips.v6.get_ip().ok().and_then(|ip| match ip {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        });
        if ipv4.is_none() && ipv6.is_none() {
            return None;
        }
        Some(ServiceEndpoint {
            mac: random_mac(),
            ipv4,
            ipv6,
        })
    }

    pub fn release_endpoint(&mut self, ep: &ServiceEndpoint) {
        if let Some(v4) = ep.ipv4 {
            self.node_service_ips.add_ip(IpAddr::V4(v4));
        }
        if let Some(v6) = ep.ipv6 {
            self.node_service_ips.add_ip(IpAddr::V6(v6));
        }
    }
}

fn random_mac() -> String {
    let mut mac = [0u8; 6];
    rand::thread_rng().fill(&mut mac[..]);
    // unicast, locally administered
    mac[0] = (mac[0] & 0xfe) | 0x02;
    format_mac(mac)
}

/// Addresses in `status.loadBalancer.ingress`, skipping unparseable ones
pub fn status_ingress_ips(service: &Service) -> Vec<IpAddr> {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|i| i.ip.as_deref())
                .filter_map(|ip| ip.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}
