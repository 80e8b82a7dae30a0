//! Fabric object graphs for load-balanced traffic.
//!
//! Traffic to a service's ingress addresses enters the fabric through an
//! external network on the L3Out. A contract bound to the shared service
//! graph redirects it to the service endpoint on each node hosting a
//! backend. The shared pieces (device cluster and service graph) are built
//! once for the whole cluster; the per-service pieces (redirect policy,
//! external network, contract, filter and device context) are built per
//! service and for the shared SNAT graph.

use crate::config::ControllerConfig;
use apic_client::{ApicObject, ApicSlice, objects};
use crds::ServiceEndpoint;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Name of the function node in the service graph and device context
pub const LB_NODE: &str = "loadbalancer";
const LIF_NAME: &str = "interface";
const CONTRACT_SUBJECT: &str = "loadbalancedservice";

/// One filter entry: IP protocol and an optional destination port range
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FilterEntry {
    pub protocol: String,
    /// `None` matches any port
    pub ports: Option<(u16, u16)>,
}

/// Inputs of one load-balancer graph
#[derive(Debug)]
pub struct LbGraph<'a> {
    /// Name shared by every object of the graph
    pub name: &'a str,
    /// Node name -> forwarding endpoint, for nodes with a fabric path
    pub endpoints: &'a BTreeMap<String, ServiceEndpoint>,
    /// Ingress addresses or prefixes
    pub ingress: &'a [String],
    pub filter_entries: &'a [FilterEntry],
}

/// Redirect policy with one destination per node per address family
pub fn redirect_policy(tenant: &str, name: &str, endpoints: &BTreeMap<String, ServiceEndpoint>) -> ApicObject {
    let mut rp = objects::vns_svc_redirect_pol(tenant, name);
    let rp_dn = rp.dn().to_string();
    for ep in endpoints.values() {
        if let Some(v4) = ep.ipv4 {
            rp.add_child(objects::vns_redirect_dest(&rp_dn, &v4.to_string(), &ep.mac));
        }
        if let Some(v6) = ep.ipv6 {
            rp.add_child(objects::vns_redirect_dest(&rp_dn, &v6.to_string(), &ep.mac));
        }
    }
    rp
}

/// Host route for an address; prefixes pass through unchanged
fn host_prefix(ingress: &str) -> String {
    if ingress.contains('/') {
        return ingress.to_string();
    }
    match ingress.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("{}/128", ingress),
        _ => format!("{}/32", ingress),
    }
}

/// External network providing the contract, matching the ingress addresses
pub fn ext_net(tenant: &str, l3out: &str, name: &str, ingress: &[String]) -> ApicObject {
    let mut en = objects::l3ext_inst_p(tenant, l3out, name);
    let en_dn = en.dn().to_string();
    en.add_child(objects::fv_rs_prov(&en_dn, name));
    for ip in ingress {
        en.add_child(objects::l3ext_subnet(&en_dn, &host_prefix(ip)));
    }
    en
}

/// Consumer relation placed under an existing external network
pub fn ext_net_cons(tenant: &str, l3out: &str, net: &str, contract: &str) -> ApicObject {
    let en_dn = format!("uni/tn-{}/out-{}/instP-{}", tenant, l3out, net);
    objects::fv_rs_cons(&en_dn, contract)
}

/// Contract whose single subject is bound to the service graph and to the
/// filter of the same name
pub fn contract(tenant: &str, name: &str, graph: &str) -> ApicObject {
    let mut con = objects::vz_br_cp(tenant, name);
    let mut subj = objects::vz_subj(con.dn(), CONTRACT_SUBJECT);
    let subj_dn = subj.dn().to_string();
    subj.add_child(objects::vz_rs_subj_graph_att(&subj_dn, graph));
    subj.add_child(objects::vz_rs_subj_filt_att(&subj_dn, name));
    con.add_child(subj);
    con
}

pub fn filter(tenant: &str, name: &str, entries: &[FilterEntry]) -> ApicObject {
    let mut flt = objects::vz_filter(tenant, name);
    let flt_dn = flt.dn().to_string();
    for (idx, entry) in entries.iter().enumerate() {
        let mut e = objects::vz_entry(&flt_dn, &idx.to_string())
            .with_attr("etherT", "ip")
            .with_attr("prot", entry.protocol.as_str());
        if let Some((from, to)) = entry.ports {
            e.set_attr("dFromPort", from.to_string());
            e.set_attr("dToPort", to.to_string());
        }
        flt.add_child(e);
    }
    flt
}

/// Device context binding the contract to the redirect policy, the service
/// bridge domain and the shared logical interface
pub fn device_context(tenant: &str, name: &str, graph: &str, bd: &str, rp_dn: &str) -> ApicObject {
    let mut ctx = objects::vns_ldev_ctx(tenant, name, graph, LB_NODE);
    let ctx_dn = ctx.dn().to_string();
    let ldev_dn = format!("uni/tn-{}/lDevVip-{}", tenant, graph);
    let lif_dn = format!("{}/lIf-{}", ldev_dn, LIF_NAME);
    let bd_dn = format!("uni/tn-{}/BD-{}", tenant, bd);

    ctx.add_child(objects::vns_rs_ldev_ctx_to_ldev(&ctx_dn, &ldev_dn));
    for conn in ["consumer", "provider"] {
        let mut lif_ctx = objects::vns_lif_ctx(&ctx_dn, conn);
        let lif_ctx_dn = lif_ctx.dn().to_string();
        lif_ctx.add_child(objects::vns_rs_lif_ctx_to_svc_redirect_pol(&lif_ctx_dn, rp_dn));
        lif_ctx.add_child(objects::vns_rs_lif_ctx_to_bd(&lif_ctx_dn, &bd_dn));
        lif_ctx.add_child(objects::vns_rs_lif_ctx_to_lif(&lif_ctx_dn, &lif_dn));
        ctx.add_child(lif_ctx);
    }
    ctx
}

/// Unmanaged device cluster with one concrete device per node
///
/// `paths` maps node name to fabric path; iteration order is node order.
pub fn device_cluster(
    tenant: &str,
    name: &str,
    phys_dom: &str,
    encap: &str,
    paths: &BTreeMap<String, String>,
) -> ApicObject {
    let mut dc = objects::vns_ldev_vip(tenant, name).with_attr("managed", "no");
    let dc_dn = dc.dn().to_string();
    dc.add_child(objects::vns_rs_aldev_to_phys_dom_p(&dc_dn, &format!("uni/phys-{}", phys_dom)));

    let mut lif = objects::vns_lif(&dc_dn, LIF_NAME).with_attr("encap", encap);
    let lif_dn = lif.dn().to_string();

    for (node, path) in paths {
        let mut cdev = objects::vns_cdev(&dc_dn, node);
        let mut cif = objects::vns_cif(cdev.dn(), LIF_NAME);
        let cif_dn = cif.dn().to_string();
        cif.add_child(objects::vns_rs_cif_path_att(&cif_dn, path));
        cdev.add_child(cif);
        lif.add_child(objects::vns_rs_cif_att_n(&lif_dn, &cif_dn));
        dc.add_child(cdev);
    }
    dc.add_child(lif);
    dc
}

/// Two-terminal service graph with a single redirecting function node
pub fn service_graph(tenant: &str, name: &str, dc_dn: &str) -> ApicObject {
    let mut sg = objects::vns_abs_graph(tenant, name);
    let sg_dn = sg.dn().to_string();

    let mut node = objects::vns_abs_node(&sg_dn, LB_NODE)
        .with_attr("managed", "no")
        .with_attr("routingMode", "Redirect");
    let node_dn = node.dn().to_string();
    let cons = objects::vns_abs_func_conn(&node_dn, "consumer");
    let cons_dn = cons.dn().to_string();
    let prov = objects::vns_abs_func_conn(&node_dn, "provider");
    let prov_dn = prov.dn().to_string();
    node.add_child(cons);
    node.add_child(prov);
    node.add_child(objects::vns_rs_node_to_ldev(&node_dn, dc_dn));
    sg.add_child(node);

    let (tnc, c_term_dn) = terminal(objects::vns_abs_term_node_con(&sg_dn, "T1"));
    sg.add_child(tnc);
    let (tnp, p_term_dn) = terminal(objects::vns_abs_term_node_prov(&sg_dn, "T2"));
    sg.add_child(tnp);

    for (conn, func_dn, term_dn) in [("C1", &cons_dn, &c_term_dn), ("C2", &prov_dn, &p_term_dn)] {
        let mut c = objects::vns_abs_connection(&sg_dn, conn).with_attr("connDir", "provider");
        let c_dn = c.dn().to_string();
        c.add_child(objects::vns_rs_abs_connection_conns(&c_dn, func_dn));
        c.add_child(objects::vns_rs_abs_connection_conns(&c_dn, term_dn));
        sg.add_child(c);
    }
    sg
}

// Adds the connector and both terminals; returns the connector DN
fn terminal(mut term_node: ApicObject) -> (ApicObject, String) {
    let tn_dn = term_node.dn().to_string();
    let conn = objects::vns_abs_term_conn(&tn_dn);
    let conn_dn = conn.dn().to_string();
    term_node.add_child(conn);
    term_node.add_child(objects::vns_in_term(&tn_dn));
    term_node.add_child(objects::vns_out_term(&tn_dn));
    (term_node, conn_dn)
}

/// Per-service (or SNAT) objects. Empty when no endpoint is reachable,
/// which clears whatever was written before.
pub fn load_balancer_objects(config: &ControllerConfig, graph_name: &str, bd_name: &str, lb: &LbGraph<'_>) -> ApicSlice {
    if lb.endpoints.is_empty() {
        return ApicSlice::new();
    }
    let tenant = config.aci_vrf_tenant.as_str();
    let mut slice = ApicSlice::new();

    let rp = redirect_policy(tenant, lb.name, lb.endpoints);
    let rp_dn = rp.dn().to_string();
    slice.push(rp);
    slice.push(ext_net(tenant, &config.aci_l3out, lb.name, lb.ingress));
    slice.push(contract(tenant, lb.name, graph_name));
    for net in &config.aci_ext_networks {
        slice.push(ext_net_cons(tenant, &config.aci_l3out, net, lb.name));
    }
    slice.push(filter(tenant, lb.name, lb.filter_entries));
    slice.push(device_context(tenant, lb.name, graph_name, bd_name, &rp_dn));
    slice
}

/// Device cluster and service graph shared by every service
pub fn global_objects(config: &ControllerConfig, graph_name: &str, paths: &BTreeMap<String, String>) -> ApicSlice {
    let tenant = config.aci_vrf_tenant.as_str();
    let dc = device_cluster(
        tenant,
        graph_name,
        &config.aci_service_phys_dom,
        &config.aci_service_encap,
        paths,
    );
    let sg = service_graph(tenant, graph_name, dc.dn());
    vec![dc, sg]
}

/// Service bridge domain with the node service gateway subnets
pub fn static_service_objects(config: &ControllerConfig, bd_name: &str) -> ApicSlice {
    let mut bd = objects::fv_bd(&config.aci_vrf_tenant, bd_name)
        .with_attr("arpFlood", "yes")
        .with_attr("ipLearning", "no")
        .with_attr("unkMacUcastAct", "flood");
    let bd_dn = bd.dn().to_string();
    bd.add_child(objects::fv_rs_bd_to_out(&bd_dn, &config.aci_l3out));
    bd.add_child(objects::fv_rs_ctx(&bd_dn, &config.aci_vrf));
    for cidr in &config.node_service_subnets {
        bd.add_child(objects::fv_subnet(&bd_dn, cidr));
    }
    vec![bd]
}

/// One entry per service port, UDP ports as udp and everything else as tcp
pub fn service_filter_entries(service: &Service) -> Vec<FilterEntry> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    let port = u16::try_from(p.port).ok()?;
                    Some(FilterEntry {
                        protocol: port_protocol(p.protocol.as_deref()).to_string(),
                        ports: Some((port, port)),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn port_protocol(protocol: Option<&str>) -> &'static str {
    if protocol == Some("UDP") { "udp" } else { "tcp" }
}
