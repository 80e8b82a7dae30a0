//! Service reconciliation.
//!
//! A LoadBalancer service gets ingress addresses from the service pools, a
//! forwarding endpoint on every node hosting one of its backends, and (with
//! fabric sync on) its own redirect graph. Every service, whatever its type,
//! is published to the VMM inventory as a `vmmInjectedSvc`.

use super::service_graph::{self, LbGraph};
use super::{Action, Reconciler};
use crate::error::ControllerError;
use crate::state::{ControllerState, status_ingress_ips};
use apic_client::objects;
use crds::{SERVICE_EP_ANNOTATION, ServiceEndpoint, ServiceEndpointMap, parse_annotation, to_annotation};
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Reconcile the service stored under `namespace/name`. A service
    /// missing from the cache has been deleted.
    pub async fn handle_service(&self, key: &str) -> Result<Action, ControllerError> {
        let Some(service) = self.get_service(key) else {
            debug!("Service {} no longer exists", key);
            self.clear_lb_service(key).await?;
            self.clear_objects(&self.name_for("service-vmm", key)).await?;
            return Ok(Action::Done);
        };

        let lb_ip = if is_load_balancer(&service) {
            self.reconcile_load_balancer(key, &service).await?.into_iter().next()
        } else {
            self.clear_lb_service(key).await?;
            status_ingress_ips(&service).into_iter().next()
        };

        self.write_vmm_service(key, &service, lb_ip).await?;
        Ok(Action::Done)
    }

    /// Return every address the service held and drop its graph
    pub(crate) async fn clear_lb_service(&self, key: &str) -> Result<(), ControllerError> {
        if self.lock_state().release_service(key) {
            info!("Released load balancer addresses of {}", key);
        }
        self.clear_objects(&self.name_for("svc", key)).await
    }

    /// Returns the ingress addresses the service should advertise
    async fn reconcile_load_balancer(&self, key: &str, service: &Service) -> Result<Vec<IpAddr>, ControllerError> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let sync = self.config.apic_sync_enabled;
        let allocate = self.config.allocate_service_ips;

        let status_ips = status_ingress_ips(service);
        let requested = requested_ip(service);
        let annotated = annotated_endpoints(key, service);
        let nodes = self.service_nodes(key);

        let (ingress, endpoint_table, graph_endpoints) = {
            let mut state = self.lock_state();
            state.ensure_service_meta(key);
            if allocate {
                allocate_service_ips(&mut state, key, &status_ips, requested, sync);
            }
            let table = reconcile_node_endpoints(&mut state, key, &annotated, &nodes, sync);

            let meta = state.service_meta.get(key).cloned().unwrap_or_default();
            let ingress = if allocate { meta.ingress() } else { status_ips.clone() };
            let graph_endpoints: BTreeMap<String, ServiceEndpoint> = meta
                .node_service_eps
                .into_iter()
                .filter(|(node, _)| state.fabric_path_for_node(node).is_some())
                .collect();
            (ingress, table, graph_endpoints)
        };

        if let Some(table) = endpoint_table.filter(|t| *t != annotated) {
            match to_annotation(&table) {
                Ok(value) => {
                    self.services_api
                        .patch_annotation(namespace, name, SERVICE_EP_ANNOTATION, &value)
                        .await?;
                    info!("Updated node service endpoints of {}: {}", key, value);
                }
                Err(e) => warn!("Could not encode node service endpoints of {}: {}", key, e),
            }
        }

        if allocate && sync && ingress != status_ips {
            let lb_ingress = ingress
                .iter()
                .map(|ip| LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                })
                .collect();
            self.services_api.patch_ingress(namespace, name, lb_ingress).await?;
            info!("Updated load balancer status of {} to {:?}", key, ingress);
        }

        if sync {
            let graph_name = self.name_for("svc", "global");
            let bd_name = self.name_for("bd", "kubernetes-service");
            let svc_name = self.name_for("svc", key);
            let ingress_strs: Vec<String> = ingress.iter().map(IpAddr::to_string).collect();
            let filter_entries = service_graph::service_filter_entries(service);
            let slice = service_graph::load_balancer_objects(
                &self.config,
                &graph_name,
                &bd_name,
                &LbGraph {
                    name: &svc_name,
                    endpoints: &graph_endpoints,
                    ingress: &ingress_strs,
                    filter_entries: &filter_entries,
                },
            );
            self.write_objects(&svc_name, slice).await?;
        }
        Ok(ingress)
    }

    async fn write_vmm_service(&self, key: &str, service: &Service, lb_ip: Option<IpAddr>) -> Result<(), ControllerError> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let spec = service.spec.clone().unwrap_or_default();

        let mut svc = objects::vmm_injected_svc(
            &self.config.aci_vmm_type,
            &self.config.aci_vmm_domain,
            &self.config.aci_vmm_controller,
            namespace,
            name,
        );
        let svc_dn = svc.dn().to_string();
        svc.set_attr("guid", service.metadata.uid.clone().unwrap_or_default());
        svc.set_attr("type", service_type_attr(spec.type_.as_deref()));
        svc.set_attr("clusterIp", spec.cluster_ip.clone().unwrap_or_default());
        // the fabric model allows a single address
        if let Some(ip) = lb_ip {
            svc.set_attr("lbIp", ip.to_string());
        }

        for port in spec.ports.iter().flatten() {
            let target = match &port.target_port {
                Some(IntOrString::Int(p)) => p.to_string(),
                Some(IntOrString::String(s)) => s.clone(),
                None => port.port.to_string(),
            };
            let mut p = objects::vmm_injected_svc_port(
                &svc_dn,
                &port.port.to_string(),
                service_graph::port_protocol(port.protocol.as_deref()),
                &target,
            );
            p.set_attr("nodePort", port.node_port.unwrap_or(0).to_string());
            svc.add_child(p);
        }
        for pod in self.service_pods(key) {
            svc.add_child(objects::vmm_injected_svc_ep(&svc_dn, &pod));
        }

        self.write_objects(&self.name_for("service-vmm", key), vec![svc]).await
    }
}

fn is_load_balancer(service: &Service) -> bool {
    service.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
}

fn service_type_attr(type_: Option<&str>) -> &'static str {
    match type_ {
        None | Some("ClusterIP") => "clusterIp",
        Some("NodePort") => "nodePort",
        Some("LoadBalancer") => "loadBalancer",
        Some("ExternalName") => "externalName",
        Some(_) => "",
    }
}

fn requested_ip(service: &Service) -> Option<IpAddr> {
    let raw = service.spec.as_ref()?.load_balancer_ip.as_deref()?;
    match raw.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            if !raw.is_empty() {
                warn!("Ignoring unparseable loadBalancerIP {:?}", raw);
            }
            None
        }
    }
}

fn annotated_endpoints(key: &str, service: &Service) -> ServiceEndpointMap {
    let Some(raw) = service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SERVICE_EP_ANNOTATION))
    else {
        return ServiceEndpointMap::new();
    };
    parse_annotation(raw).unwrap_or_else(|e| {
        warn!("Could not parse service endpoint annotation of {}: {}", key, e);
        ServiceEndpointMap::new()
    })
}

/// Settle the ingress addresses of a service.
///
/// Advertised addresses are always adopted. With sync on, a requested
/// address becomes the only one held; withdrawing the request returns the
/// static addresses; a service holding nothing draws one dynamic address,
/// IPv4 before IPv6.
pub(crate) fn allocate_service_ips(
    state: &mut ControllerState,
    key: &str,
    status_ips: &[IpAddr],
    requested: Option<IpAddr>,
    sync: bool,
) {
    state.adopt_ingress(key, status_ips);
    if !sync {
        return;
    }

    let ControllerState {
        service_ips,
        static_service_ips,
        service_meta,
        ..
    } = state;
    let meta = service_meta.entry(key.to_string()).or_default();

    match requested {
        Some(ip) if meta.ingress_ips.contains(&ip) => {
            // held from the dynamic pool already: keep it there
            let others: Vec<IpAddr> = meta.ingress_ips.iter().copied().filter(|i| *i != ip).collect();
            service_ips.return_ips(&others);
            static_service_ips.return_ips(&meta.static_ingress_ips);
            meta.ingress_ips = vec![ip];
            meta.static_ingress_ips.clear();
            meta.requested_ip = Some(ip);
        }
        Some(ip) if meta.static_ingress_ips.contains(&ip) || static_service_ips.remove_ip(ip) => {
            service_ips.return_ips(&meta.ingress_ips);
            meta.ingress_ips.clear();
            let others: Vec<IpAddr> = meta.static_ingress_ips.iter().copied().filter(|i| *i != ip).collect();
            static_service_ips.return_ips(&others);
            meta.static_ingress_ips = vec![ip];
            meta.requested_ip = Some(ip);
        }
        Some(ip) => warn!("Requested load balancer IP {} for {} is not available", ip, key),
        None => {
            if meta.requested_ip.take().is_some() {
                static_service_ips.return_ips(&meta.static_ingress_ips);
                meta.static_ingress_ips.clear();
            }
        }
    }

    if meta.ingress_ips.is_empty() && meta.static_ingress_ips.is_empty() {
        match service_ips.v4.get_ip().or_else(|_| service_ips.v6.get_ip()) {
            Ok(ip) => {
                debug!("Allocated {} to {}", ip, key);
                meta.ingress_ips.push(ip);
            }
            Err(e) => warn!("No load balancer address for {}: {}", key, e),
        }
    }
}

/// Bring the node endpoint table of a service in line with the nodes that
/// back it. Returns the resulting table, or `None` with sync off (in which
/// case only the annotated entries are adopted).
pub(crate) fn reconcile_node_endpoints(
    state: &mut ControllerState,
    key: &str,
    annotated: &ServiceEndpointMap,
    nodes: &BTreeSet<String>,
    sync: bool,
) -> Option<ServiceEndpointMap> {
    state.adopt_endpoints(key, annotated);
    if !sync {
        return None;
    }

    let (missing, stale): (Vec<String>, Vec<String>) = {
        let held = &state.ensure_service_meta(key).node_service_eps;
        (
            nodes.iter().filter(|n| !held.contains_key(*n)).cloned().collect(),
            held.keys().filter(|n| !nodes.contains(*n)).cloned().collect(),
        )
    };

    for node in missing {
        match state.allocate_endpoint() {
            Some(ep) => {
                debug!("Allocated service endpoint {:?} on {} for {}", ep, node, key);
                state.ensure_service_meta(key).node_service_eps.insert(node, ep);
            }
            None => warn!("No node service address left for {} on {}", key, node),
        }
    }
    for node in stale {
        if let Some(ep) = state.ensure_service_meta(key).node_service_eps.remove(&node) {
            debug!("Releasing service endpoint of {} on {}", key, node);
            state.release_endpoint(&ep);
        }
    }

    Some(state.ensure_service_meta(key).node_service_eps.clone())
}
