//! Test utilities for unit testing reconcilers
//!
//! Helpers for building test objects and a reconciler wired to in-memory
//! collaborators: a `MockApicClient`, a recording `ServiceWriter` and
//! reflector stores the test feeds by hand.

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, Stores};
use crate::service_writer::RecordingServiceWriter;
use apic_client::{ApicObject, MockApicClient};
use crds::{
    FlowSamplingPolicy, NetflowPolicy, NetflowPolicySpec, PodSelector, PortRange, SnatPolicy, SnatPolicySpec,
};
use ipam::IpRange;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, LoadBalancerIngress, LoadBalancerStatus, ObjectReference, Service,
    ServicePort, ServiceSpec, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::reflector::{self, store::Writer};
use kube_runtime::watcher;
use std::sync::Arc;

fn range(start: &str, end: &str) -> IpRange {
    IpRange::new(start.parse().unwrap(), end.parse().unwrap()).unwrap()
}

/// Pools: dynamic 10.3.0.1-10.3.0.20 and fd00:3::1-fd00:3::2, static
/// 10.3.0.10-10.3.0.12, node 10.6.0.2-10.6.0.20
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        aci_prefix: "kube".to_string(),
        aci_vrf_tenant: "common".to_string(),
        aci_vrf: "kube-vrf".to_string(),
        aci_l3out: "l3out".to_string(),
        aci_ext_networks: vec!["default".to_string()],
        aci_vmm_domain: "kube-domain".to_string(),
        aci_vmm_controller: "kube-ctrlr".to_string(),
        aci_service_phys_dom: "kube-pdom".to_string(),
        aci_service_encap: "vlan-4001".to_string(),
        service_ip_pool: vec![range("10.3.0.1", "10.3.0.20"), range("fd00:3::1", "fd00:3::2")],
        static_service_ip_pool: vec![range("10.3.0.10", "10.3.0.12")],
        node_service_ip_pool: vec![range("10.6.0.2", "10.6.0.20")],
        node_service_subnets: vec!["10.6.0.1/24".to_string()],
        apic_hosts: vec!["apic.example.com".to_string()],
        apic_username: "admin".to_string(),
        ..ControllerConfig::default()
    }
}

/// Service of the given type with one TCP port 80
pub fn create_test_service(namespace: &str, name: &str, type_: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            cluster_ip: Some("10.96.0.10".to_string()),
            ports: Some(vec![ServicePort {
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// LoadBalancer service advertising `ingress` in its status
pub fn create_test_lb_service(namespace: &str, name: &str, ingress: &[&str]) -> Service {
    let mut service = create_test_service(namespace, name, "LoadBalancer");
    if !ingress.is_empty() {
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    ingress
                        .iter()
                        .map(|ip| LoadBalancerIngress {
                            ip: Some((*ip).to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    service
}

/// Endpoints with one address per `(node, pod)` pair
pub fn create_test_endpoints(namespace: &str, name: &str, backends: &[(&str, &str)]) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                backends
                    .iter()
                    .enumerate()
                    .map(|(idx, (node, pod))| EndpointAddress {
                        ip: format!("10.2.0.{}", idx + 1),
                        node_name: Some((*node).to_string()),
                        target_ref: Some(ObjectReference {
                            kind: Some("Pod".to_string()),
                            name: Some((*pod).to_string()),
                            namespace: Some(namespace.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }]),
    }
}

pub fn create_test_snat_policy(name: &str, snat_ips: &[&str], ports: &[(u16, u16)], protocols: &[&str]) -> SnatPolicy {
    SnatPolicy::new(
        name,
        SnatPolicySpec {
            snat_ip: snat_ips.iter().map(|s| (*s).to_string()).collect(),
            selector: PodSelector::default(),
            port_range: ports.iter().map(|(start, end)| PortRange { start: *start, end: *end }).collect(),
            protocols: protocols.iter().map(|p| (*p).to_string()).collect(),
        },
    )
}

pub fn create_test_netflow_policy(name: &str, version: &str) -> NetflowPolicy {
    NetflowPolicy::new(
        name,
        NetflowPolicySpec {
            flow_sampling_policy: FlowSamplingPolicy {
                dst_addr: "172.51.1.2".to_string(),
                dst_port: 2055,
                version: version.to_string(),
                active_flow_time_out: 60,
                idle_flow_time_out: 15,
            },
        },
    )
}

/// opflexODev as reported by the fabric
pub fn create_test_odev(dn: &str, host: &str, path: &str, domain: &str, controller: &str) -> ApicObject {
    ApicObject::new("opflexODev", dn)
        .with_attr("hostName", host)
        .with_attr("fabricPathDn", path)
        .with_attr("domName", domain)
        .with_attr("ctrlrName", controller)
}

/// Reconciler over in-memory collaborators, plus the handles a test needs
/// to drive it
pub struct TestHarness {
    pub reconciler: Arc<Reconciler>,
    pub apic: Arc<MockApicClient>,
    pub writer: Arc<RecordingServiceWriter>,
    pub services: Writer<Service>,
    pub endpoints: Writer<Endpoints>,
    pub snat_policies: Writer<SnatPolicy>,
    pub netflow_policies: Writer<NetflowPolicy>,
}

impl TestHarness {
    pub fn new(config: ControllerConfig) -> Self {
        let (services_store, services) = reflector::store();
        let (endpoints_store, endpoints) = reflector::store();
        let (snat_store, snat_policies) = reflector::store();
        let (netflow_store, netflow_policies) = reflector::store();
        let stores = Stores {
            services: services_store,
            endpoints: endpoints_store,
            snat_policies: snat_store,
            netflow_policies: netflow_store,
        };

        let apic = Arc::new(MockApicClient::new());
        let writer = Arc::new(RecordingServiceWriter::default());
        let reconciler = Reconciler::new(
            config,
            apic.clone(),
            writer.clone(),
            stores,
            Metrics::new().unwrap(),
        )
        .unwrap();

        Self {
            reconciler: Arc::new(reconciler),
            apic,
            writer,
            services,
            endpoints,
            snat_policies,
            netflow_policies,
        }
    }

    pub fn apply_service(&mut self, service: Service) {
        self.services.apply_watcher_event(&watcher::Event::Apply(service));
    }

    pub fn delete_service(&mut self, service: Service) {
        self.services.apply_watcher_event(&watcher::Event::Delete(service));
    }

    pub fn apply_endpoints(&mut self, endpoints: Endpoints) {
        self.endpoints.apply_watcher_event(&watcher::Event::Apply(endpoints));
    }

    pub fn apply_snat_policy(&mut self, policy: SnatPolicy) {
        self.snat_policies.apply_watcher_event(&watcher::Event::Apply(policy));
    }

    pub fn delete_snat_policy(&mut self, policy: SnatPolicy) {
        self.snat_policies.apply_watcher_event(&watcher::Event::Delete(policy));
    }

    pub fn apply_netflow_policy(&mut self, policy: NetflowPolicy) {
        self.netflow_policies.apply_watcher_event(&watcher::Event::Apply(policy));
    }

    pub fn delete_netflow_policy(&mut self, policy: NetflowPolicy) {
        self.netflow_policies.apply_watcher_event(&watcher::Event::Delete(policy));
    }

    /// Attach `node` to the fabric at `path`
    pub async fn attach_node(&self, dn: &str, node: &str, path: &str) {
        let config = &self.reconciler.config;
        let odev = create_test_odev(dn, node, path, &config.aci_vmm_domain, &config.aci_vmm_controller);
        self.reconciler.opflex_device_changed(&odev).await.unwrap();
    }
}
