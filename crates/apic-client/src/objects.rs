//! Constructors for the managed-object classes the controllers write
//!
//! Each constructor derives the object's DN from its parent DN (or tenant)
//! and sets the naming attributes APIC expects for that class. Relation
//! objects (`Rs*`) carry either a `tDn` or a `tn*Name` target.

use crate::models::ApicObject;

// Tenant networking

pub fn fv_bd(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new("fvBD", format!("uni/tn-{}/BD-{}", tenant, name)).with_attr("name", name)
}

pub fn fv_rs_bd_to_out(bd_dn: &str, l3out: &str) -> ApicObject {
    ApicObject::new("fvRsBDToOut", format!("{}/rsBDToOut-{}", bd_dn, l3out))
        .with_attr("tnL3extOutName", l3out)
}

pub fn fv_rs_ctx(bd_dn: &str, vrf: &str) -> ApicObject {
    ApicObject::new("fvRsCtx", format!("{}/rsctx", bd_dn)).with_attr("tnFvCtxName", vrf)
}

pub fn fv_subnet(bd_dn: &str, cidr: &str) -> ApicObject {
    ApicObject::new("fvSubnet", format!("{}/subnet-[{}]", bd_dn, cidr)).with_attr("ip", cidr)
}

pub fn l3ext_inst_p(tenant: &str, l3out: &str, name: &str) -> ApicObject {
    ApicObject::new("l3extInstP", format!("uni/tn-{}/out-{}/instP-{}", tenant, l3out, name))
        .with_attr("name", name)
}

pub fn l3ext_subnet(parent_dn: &str, ip: &str) -> ApicObject {
    ApicObject::new("l3extSubnet", format!("{}/extsubnet-[{}]", parent_dn, ip)).with_attr("ip", ip)
}

pub fn fv_rs_prov(parent_dn: &str, contract: &str) -> ApicObject {
    ApicObject::new("fvRsProv", format!("{}/rsprov-{}", parent_dn, contract))
        .with_attr("tnVzBrCPName", contract)
}

pub fn fv_rs_cons(parent_dn: &str, contract: &str) -> ApicObject {
    ApicObject::new("fvRsCons", format!("{}/rscons-{}", parent_dn, contract))
        .with_attr("tnVzBrCPName", contract)
}

// Contracts and filters

pub fn vz_br_cp(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new("vzBrCP", format!("uni/tn-{}/brc-{}", tenant, name)).with_attr("name", name)
}

pub fn vz_subj(contract_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vzSubj", format!("{}/subj-{}", contract_dn, name)).with_attr("name", name)
}

pub fn vz_rs_subj_graph_att(subj_dn: &str, graph: &str) -> ApicObject {
    ApicObject::new("vzRsSubjGraphAtt", format!("{}/rsSubjGraphAtt", subj_dn))
        .with_attr("tnVnsAbsGraphName", graph)
}

pub fn vz_rs_subj_filt_att(subj_dn: &str, filter: &str) -> ApicObject {
    ApicObject::new("vzRsSubjFiltAtt", format!("{}/rssubjFiltAtt-{}", subj_dn, filter))
        .with_attr("tnVzFilterName", filter)
}

pub fn vz_filter(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new("vzFilter", format!("uni/tn-{}/flt-{}", tenant, name)).with_attr("name", name)
}

pub fn vz_entry(filter_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vzEntry", format!("{}/e-{}", filter_dn, name)).with_attr("name", name)
}

// L4-L7 service insertion

pub fn vns_svc_redirect_pol(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new(
        "vnsSvcRedirectPol",
        format!("uni/tn-{}/svcCont/svcRedirectPol-{}", tenant, name),
    )
    .with_attr("name", name)
}

pub fn vns_redirect_dest(redirect_pol_dn: &str, ip: &str, mac: &str) -> ApicObject {
    ApicObject::new("vnsRedirectDest", format!("{}/RedirectDest_ip-[{}]", redirect_pol_dn, ip))
        .with_attr("ip", ip)
        .with_attr("mac", mac)
}

pub fn vns_ldev_ctx(tenant: &str, contract: &str, graph: &str, node: &str) -> ApicObject {
    ApicObject::new(
        "vnsLDevCtx",
        format!("uni/tn-{}/ldevCtx-c-{}-g-{}-n-{}", tenant, contract, graph, node),
    )
    .with_attr("ctrctNameOrLbl", contract)
    .with_attr("graphNameOrLbl", graph)
    .with_attr("nodeNameOrLbl", node)
}

pub fn vns_rs_ldev_ctx_to_ldev(ctx_dn: &str, ldev_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsLDevCtxToLDev", format!("{}/rsLDevCtxToLDev", ctx_dn)).with_attr("tDn", ldev_dn)
}

pub fn vns_lif_ctx(ctx_dn: &str, conn: &str) -> ApicObject {
    ApicObject::new("vnsLIfCtx", format!("{}/lIfCtx-c-{}", ctx_dn, conn)).with_attr("connNameOrLbl", conn)
}

pub fn vns_rs_lif_ctx_to_svc_redirect_pol(lif_ctx_dn: &str, redirect_pol_dn: &str) -> ApicObject {
    ApicObject::new(
        "vnsRsLIfCtxToSvcRedirectPol",
        format!("{}/rsLIfCtxToSvcRedirectPol", lif_ctx_dn),
    )
    .with_attr("tDn", redirect_pol_dn)
}

pub fn vns_rs_lif_ctx_to_bd(lif_ctx_dn: &str, bd_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsLIfCtxToBD", format!("{}/rsLIfCtxToBD", lif_ctx_dn)).with_attr("tDn", bd_dn)
}

pub fn vns_rs_lif_ctx_to_lif(lif_ctx_dn: &str, lif_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsLIfCtxToLIf", format!("{}/rsLIfCtxToLIf", lif_ctx_dn)).with_attr("tDn", lif_dn)
}

pub fn vns_ldev_vip(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsLDevVip", format!("uni/tn-{}/lDevVip-{}", tenant, name)).with_attr("name", name)
}

pub fn vns_rs_aldev_to_phys_dom_p(ldev_dn: &str, dom_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsALDevToPhysDomP", format!("{}/rsALDevToPhysDomP", ldev_dn)).with_attr("tDn", dom_dn)
}

pub fn vns_lif(ldev_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsLIf", format!("{}/lIf-{}", ldev_dn, name)).with_attr("name", name)
}

pub fn vns_cdev(ldev_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsCDev", format!("{}/cDev-{}", ldev_dn, name)).with_attr("name", name)
}

pub fn vns_cif(cdev_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsCIf", format!("{}/cIf-[{}]", cdev_dn, name)).with_attr("name", name)
}

pub fn vns_rs_cif_path_att(cif_dn: &str, path: &str) -> ApicObject {
    ApicObject::new("vnsRsCIfPathAtt", format!("{}/rsCIfPathAtt", cif_dn)).with_attr("tDn", path)
}

pub fn vns_rs_cif_att_n(lif_dn: &str, cif_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsCIfAttN", format!("{}/rscIfAttN-[{}]", lif_dn, cif_dn)).with_attr("tDn", cif_dn)
}

pub fn vns_abs_graph(tenant: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsGraph", format!("uni/tn-{}/AbsGraph-{}", tenant, name)).with_attr("name", name)
}

pub fn vns_abs_node(graph_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsNode", format!("{}/AbsNode-{}", graph_dn, name)).with_attr("name", name)
}

pub fn vns_abs_func_conn(node_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsFuncConn", format!("{}/AbsFConn-{}", node_dn, name)).with_attr("name", name)
}

pub fn vns_rs_node_to_ldev(node_dn: &str, ldev_dn: &str) -> ApicObject {
    ApicObject::new("vnsRsNodeToLDev", format!("{}/rsNodeToLDev", node_dn)).with_attr("tDn", ldev_dn)
}

pub fn vns_abs_term_node_con(graph_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsTermNodeCon", format!("{}/AbsTermNodeCon-{}", graph_dn, name)).with_attr("name", name)
}

pub fn vns_abs_term_node_prov(graph_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsTermNodeProv", format!("{}/AbsTermNodeProv-{}", graph_dn, name)).with_attr("name", name)
}

pub fn vns_abs_term_conn(term_node_dn: &str) -> ApicObject {
    ApicObject::new("vnsAbsTermConn", format!("{}/AbsTConn", term_node_dn))
}

pub fn vns_in_term(term_node_dn: &str) -> ApicObject {
    ApicObject::new("vnsInTerm", format!("{}/intmnl", term_node_dn))
}

pub fn vns_out_term(term_node_dn: &str) -> ApicObject {
    ApicObject::new("vnsOutTerm", format!("{}/outtmnl", term_node_dn))
}

pub fn vns_abs_connection(graph_dn: &str, name: &str) -> ApicObject {
    ApicObject::new("vnsAbsConnection", format!("{}/AbsConnection-{}", graph_dn, name)).with_attr("name", name)
}

pub fn vns_rs_abs_connection_conns(conn_dn: &str, target_dn: &str) -> ApicObject {
    ApicObject::new(
        "vnsRsAbsConnectionConns",
        format!("{}/rsabsConnectionConns-[{}]", conn_dn, target_dn),
    )
    .with_attr("tDn", target_dn)
}

// VMM visibility and flow export

pub fn vmm_injected_svc(vmm_type: &str, domain: &str, controller: &str, namespace: &str, name: &str) -> ApicObject {
    ApicObject::new(
        "vmmInjectedSvc",
        format!(
            "comp/prov-{}/ctrlr-[{}]-{}/injcont/ns-[{}]/svc-[{}]",
            vmm_type, domain, controller, namespace, name
        ),
    )
    .with_attr("name", name)
}

pub fn vmm_injected_svc_port(svc_dn: &str, port: &str, protocol: &str, target_port: &str) -> ApicObject {
    ApicObject::new(
        "vmmInjectedSvcPort",
        format!("{}/p-{}-prot-{}-t-{}", svc_dn, port, protocol, target_port),
    )
    .with_attr("port", port)
    .with_attr("protocol", protocol)
    .with_attr("targetPort", target_port)
}

pub fn vmm_injected_svc_ep(svc_dn: &str, pod: &str) -> ApicObject {
    ApicObject::new("vmmInjectedSvcEp", format!("{}/ep-{}", svc_dn, pod)).with_attr("contGrpName", pod)
}

pub fn netflow_vmm_exporter_pol(name: &str) -> ApicObject {
    ApicObject::new("netflowVmmExporterPol", format!("uni/infra/vmmexporterpol-{}", name)).with_attr("name", name)
}

pub fn vmm_vswitch_policy_cont(provider: &str, domain: &str) -> ApicObject {
    ApicObject::new(
        "vmmVSwitchPolicyCont",
        format!("uni/vmmp-{}/dom-{}/vswitchpolcont", provider, domain),
    )
}

pub fn vmm_rs_vswitch_exporter_pol(provider: &str, domain: &str, exporter_dn: &str) -> ApicObject {
    ApicObject::new(
        "vmmRsVswitchExporterPol",
        format!(
            "uni/vmmp-{}/dom-{}/vswitchpolcont/rsvswitchExporterPol-[{}]",
            provider, domain, exporter_dn
        ),
    )
    .with_attr("tDn", exporter_dn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_nest_under_parent() {
        let con = vz_br_cp("common", "kube_svc_default_web");
        let subj = vz_subj(con.dn(), "loadbalancedservice");
        assert_eq!(subj.dn(), "uni/tn-common/brc-kube_svc_default_web/subj-loadbalancedservice");

        let rp = vns_svc_redirect_pol("common", "kube_svc_default_web");
        let dest = vns_redirect_dest(rp.dn(), "10.6.1.2", "aa:bb:cc:dd:ee:ff");
        assert_eq!(
            dest.dn(),
            "uni/tn-common/svcCont/svcRedirectPol-kube_svc_default_web/RedirectDest_ip-[10.6.1.2]"
        );
        assert_eq!(dest.attr_str("mac"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_device_context_naming_attributes() {
        let ctx = vns_ldev_ctx("common", "c1", "g1", "loadbalancer");
        assert_eq!(ctx.dn(), "uni/tn-common/ldevCtx-c-c1-g-g1-n-loadbalancer");
        assert_eq!(ctx.attr_str("nodeNameOrLbl"), "loadbalancer");
    }

    #[test]
    fn test_injected_service_dn() {
        let svc = vmm_injected_svc("Kubernetes", "kube", "kube", "default", "web");
        assert_eq!(svc.dn(), "comp/prov-Kubernetes/ctrlr-[kube]-kube/injcont/ns-[default]/svc-[web]");
        let port = vmm_injected_svc_port(svc.dn(), "80", "tcp", "8080");
        assert!(port.dn().ends_with("/p-80-prot-tcp-t-8080"));
    }
}
