//! Unit tests for the NetFlow handler

#[cfg(test)]
mod tests {
    use crate::reconciler::Action;
    use crate::test_utils::*;
    use apic_client::MockCall;

    const NFP_KEY: &str = "kube_nfp_flows";

    #[tokio::test]
    async fn test_exporter_policy_written() {
        let mut h = TestHarness::new(test_config());
        h.apply_netflow_policy(create_test_netflow_policy("flows", "netflow"));

        assert_eq!(h.reconciler.handle_netflow("flows").await.unwrap(), Action::Done);

        let slice = h.apic.written(NFP_KEY).unwrap();
        let exporter = &slice[0];
        assert_eq!(exporter.class, "netflowVmmExporterPol");
        assert_eq!(exporter.dn(), "uni/infra/vmmexporterpol-kube_nfp_flows");
        assert_eq!(exporter.attr_str("dstAddr"), "172.51.1.2");
        assert_eq!(exporter.attr_str("dstPort"), "2055");
        assert_eq!(exporter.attr_str("ver"), "v5");

        let cont = &slice[1];
        assert_eq!(cont.dn(), "uni/vmmp-Kubernetes/dom-kube-domain/vswitchpolcont");
        let rs = cont.children_of("vmmRsVswitchExporterPol").next().unwrap();
        assert_eq!(rs.attr_str("tDn"), exporter.dn());
        assert_eq!(rs.attr_str("activeFlowTimeOut"), "60");
        assert_eq!(rs.attr_str("idleFlowTimeOut"), "15");
    }

    #[tokio::test]
    async fn test_exporter_version_mapping() {
        let mut h = TestHarness::new(test_config());
        h.apply_netflow_policy(create_test_netflow_policy("ipfix", "ipfix"));
        h.apply_netflow_policy(create_test_netflow_policy("other", "sflow"));
        h.reconciler.handle_netflow("ipfix").await.unwrap();
        h.reconciler.handle_netflow("other").await.unwrap();

        assert_eq!(h.apic.written("kube_nfp_ipfix").unwrap()[0].attr_str("ver"), "v9");
        assert_eq!(h.apic.written("kube_nfp_other").unwrap()[0].attr("ver"), None);
    }

    #[tokio::test]
    async fn test_deleted_policy_clears_key() {
        let mut h = TestHarness::new(test_config());
        let policy = create_test_netflow_policy("flows", "netflow");
        h.apply_netflow_policy(policy.clone());
        h.reconciler.handle_netflow("flows").await.unwrap();

        h.delete_netflow_policy(policy);
        assert_eq!(h.reconciler.handle_netflow("flows").await.unwrap(), Action::Done);
        assert!(h.apic.written(NFP_KEY).is_none());
        assert_eq!(h.apic.calls().last(), Some(&MockCall::Clear(NFP_KEY.to_string())));
    }

    #[tokio::test]
    async fn test_written_even_with_sync_disabled() {
        let mut config = test_config();
        config.apic_sync_enabled = false;
        let mut h = TestHarness::new(config);
        h.apply_netflow_policy(create_test_netflow_policy("flows", "netflow"));

        h.reconciler.handle_netflow("flows").await.unwrap();
        assert!(h.apic.written(NFP_KEY).is_some());
    }
}
